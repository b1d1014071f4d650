//
// Pack charger firmware core for USB PD battery packs
// Copyright (C) 2024 the pack-charger authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//

//! Regulator controller loop.
//!
//! Owns the charge regulator: probes it, harvests its ADC, recovers
//! UVP-latched packs with a bounded precharge, computes the charge
//! envelope from the negotiated input power and the board thermals, and
//! gates the output against the fault state.

use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::{
    battery::BatteryState,
    board::{AnalogSampler, RegulatorPins},
    bq25703a::{hi_z, otg, Bq25703a},
    bus::SharedBus,
    cfg::Config,
    fault::{Fault, FaultRegistry},
    limits::{
        ASSUME_EFFICIENCY, BATTERY_DISCONNECT_THRESH_MV, CELL_UVP_RECOVERY_MV,
        CHARGE_TERM_CURRENT_MA, MAX_CHARGING_POWER_MW, TEMP_THROTTLE_THRESH_C,
        UVP_RECOVERY_ATTEMPTS, UVP_RECOVERY_CURRENT_MA,
    },
    supply::{InputPowerState, PowerSource},
    tasks::{StateCell, CONTROL_TICK_MS},
};

/// Hold time for output toggles outside the regular tick, in loop ticks.
const OUTPUT_SETTLE_TICKS: u32 = 2;

/// Regulator state, published once per controller step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegulatorState {
    /// The last identity probe succeeded.
    pub connected: bool,
    /// The regulator reports active charging.
    pub charging: bool,
    /// Input voltage in mV.
    pub vbus_mv: u32,
    /// Battery voltage in mV.
    pub vbat_mv: u32,
    /// System voltage in mV.
    pub vsys_mv: u32,
    /// Input current in mA.
    pub input_current_ma: u32,
    /// Measured charge current in mA.
    pub charge_current_ma: u32,
    /// Last commanded charge current limit in mA.
    pub max_charge_current_ma: u32,
    /// UVP recovery precharge is running.
    pub precharging: bool,
}

/// Regulator controller loop instance.
pub struct RegulatorController<'a, I2C, P, S, U> {
    regulator: Bq25703a<'a, I2C>,
    pins: P,
    sampler: &'a S,
    supply: &'a U,
    faults: &'a FaultRegistry,
    cfg: Config,
    battery: &'a StateCell<BatteryState>,
    readout: &'a StateCell<RegulatorState>,
    state: RegulatorState,
    termination_counter: u16,
    uvp_attempts: u16,
    uvp_initial_wakeup: bool,
}

impl<'a, I2C, P, S, U> RegulatorController<'a, I2C, P, S, U>
where
    I2C: I2c,
    P: RegulatorPins,
    S: AnalogSampler,
    U: PowerSource,
{
    /// Creates the controller.
    ///
    /// `battery` is the monitor's readout; `readout` is where this
    /// controller publishes its own state.
    pub fn new(
        bus: &'a SharedBus<I2C>, pins: P, sampler: &'a S, supply: &'a U,
        faults: &'a FaultRegistry, cfg: Config, battery: &'a StateCell<BatteryState>,
        readout: &'a StateCell<RegulatorState>,
    ) -> Self {
        Self {
            regulator: Bq25703a::new(bus, faults, cfg.fixed_voltage),
            pins,
            sampler,
            supply,
            faults,
            cfg,
            battery,
            readout,
            state: Default::default(),
            termination_counter: 0,
            uvp_attempts: if cfg.attempt_uvp_recovery { UVP_RECOVERY_ATTEMPTS } else { 0 },
            uvp_initial_wakeup: true,
        }
    }

    /// Returns a copy of the current regulator state.
    pub fn state(&self) -> RegulatorState {
        self.state
    }

    /// Startup sequence: output off, OTG off, probe, operating mode, ADC.
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) {
        hi_z(&mut self.pins, true);
        otg(&mut self.pins, false);

        self.state.connected = self.regulator.identify(delay).is_connected();
        log::info!("charge regulator {}", if self.state.connected { "connected" } else { "missing" });

        if let Err(err) = self.regulator.set_charge_option_0(delay) {
            log::warn!("writing charge options failed: {:?}", err);
        }
        if let Err(err) = self.regulator.set_adc_option(delay) {
            log::warn!("configuring regulator ADC failed: {:?}", err);
        }

        delay.delay_ms(CONTROL_TICK_MS);
        self.readout.set(self.state);
    }

    /// Runs one controller iteration.
    ///
    /// `yield_point` is invoked once per loop tick spent inside this
    /// iteration's cooperative waits (UVP recovery, output toggles), so
    /// the harness can keep the battery monitor on its own cadence while
    /// the controller holds the CPU.
    pub fn step<D: DelayNs>(&mut self, delay: &mut D, yield_point: &mut impl FnMut()) {
        // Input power gate from the regulator's CHRG_OK line.
        if !self.pins.charge_ok() {
            self.faults.set(Fault::VoltageInput);
        } else if self.faults.has(Fault::VoltageInput) {
            self.faults.clear(Fault::VoltageInput);
        }

        if self.faults.has(Fault::RegulatorCommunication) {
            self.state.connected = false;
        }
        if !self.state.connected {
            // Keep probing a lost regulator; a successful probe clears the
            // communication fault.
            self.state.connected = self.regulator.identify(delay).is_connected();
        }

        self.refresh(delay);
        self.uvp_recovery(delay, yield_point);
        self.control_output(delay, yield_point);

        self.readout.set(self.state);
    }

    /// Updates the charging status and the ADC sample mirror.
    fn refresh<D: DelayNs>(&mut self, delay: &mut D) {
        match self.regulator.read_charge_status(delay) {
            Ok(charging) => self.state.charging = charging,
            Err(err) => log::debug!("charge status read failed: {:?}", err),
        }

        match self.regulator.read_adc(delay) {
            Ok(samples) => {
                self.state.vbat_mv = samples.vbat_mv;
                self.state.vsys_mv = samples.vsys_mv;
                self.state.vbus_mv = samples.vbus_mv;
                self.state.charge_current_ma = samples.charge_current_ma;
                self.state.input_current_ma = samples.input_current_ma;
            }
            Err(err) => log::debug!("ADC harvest failed: {:?}", err),
        }
    }

    /// Boot-time recovery of a UVP-latched pack.
    ///
    /// Pulses the output at a low current until the battery voltage comes
    /// back up or the attempts run out, then forces the output off and
    /// lets the readings settle. Runs its settle pass exactly once per
    /// boot and is disarmed afterwards. Every inner tick hands one turn
    /// to `yield_point`, so the battery monitor keeps checking cell and
    /// temperature limits throughout the recovery window.
    fn uvp_recovery<D: DelayNs>(&mut self, delay: &mut D, yield_point: &mut impl FnMut()) {
        if self.uvp_attempts == 0 {
            return;
        }

        let wakeup_mv = self.cfg.num_series as u32 * CELL_UVP_RECOVERY_MV;
        while self.uvp_attempts > 1 && self.state.vbat_mv < wakeup_mv {
            if !self.state.precharging {
                log::info!("UVP recovery: vbat {} mV below {} mV", self.state.vbat_mv, wakeup_mv);
            }
            self.state.precharging = true;

            // A longer first pulse gives a fully latched regulator a
            // better chance to wake up.
            let ticks = if self.uvp_initial_wakeup { 20 } else { 12 };
            self.uvp_initial_wakeup = false;

            for _ in 0..ticks {
                let _ = self.regulator.set_charge_voltage(delay, self.cfg.num_series);
                if let Ok(ma) = self.regulator.set_charge_current(delay, UVP_RECOVERY_CURRENT_MA) {
                    self.state.max_charge_current_ma = ma;
                }
                hi_z(&mut self.pins, false);
                self.refresh(delay);
                self.readout.set(self.state);
                delay.delay_ms(CONTROL_TICK_MS);
                yield_point();
            }

            self.uvp_attempts -= 1;
        }

        if self.state.precharging {
            log::info!("UVP recovery finished at vbat {} mV", self.state.vbat_mv);
        }
        self.state.precharging = false;
        self.uvp_attempts = 0;
        hi_z(&mut self.pins, true);
        for _ in 0..4 {
            delay.delay_ms(CONTROL_TICK_MS);
            yield_point();
            self.refresh(delay);
        }
    }

    /// Decides whether the output may be on and commands the setpoints.
    fn control_output<D: DelayNs>(&mut self, delay: &mut D, yield_point: &mut impl FnMut()) {
        let battery = self.battery.get();
        let input_ready = self.supply.input_power_ready() == InputPowerState::Ready;

        let enable = battery.xt60_connected
            && battery.balance_port_connected
            && !self.faults.any()
            && input_ready
            && !battery.cell_over_voltage;
        if !enable {
            hi_z(&mut self.pins, true);
            let _ = self.regulator.set_charge_voltage(delay, 0);
            if let Ok(ma) = self.regulator.set_charge_current(delay, 0) {
                self.state.max_charge_current_ma = ma;
            }
            return;
        }

        let cells = if self.cfg.enable_balancing { battery.cell_count } else { self.cfg.num_series };
        if self.regulator.set_charge_voltage(delay, cells).is_err() {
            hi_z(&mut self.pins, true);
            return;
        }

        let pack_mv = self.sampler.pack_voltage_mv();
        let power_mw = charge_power_mw(
            self.state.vbus_mv,
            self.supply.max_input_current_ma(),
            self.supply.max_input_power_mw(),
            self.sampler.controller_temperature_c(),
        );
        let current_ma = (power_mw as f32 / (pack_mv as f32 / 1000.0)) as u32;
        match self.regulator.set_charge_current(delay, current_ma) {
            Ok(ma) => self.state.max_charge_current_ma = ma,
            Err(_) => {
                hi_z(&mut self.pins, true);
                return;
            }
        }

        hi_z(&mut self.pins, false);

        // The output floats high without a pack behind it; toggle the
        // output to re-arm the regulator after a momentary disconnect.
        if self.state.vbat_mv > BATTERY_DISCONNECT_THRESH_MV * battery.cell_count as u32 {
            log::warn!("battery disconnect suspected at vbat {} mV", self.state.vbat_mv);
            hi_z(&mut self.pins, true);
            wait_ticks(delay, yield_point, 2 * OUTPUT_SETTLE_TICKS);
            hi_z(&mut self.pins, false);
        }

        // Terminate after consecutive quiet cycles on a full pack.
        if !battery.requires_charging && self.state.charge_current_ma < CHARGE_TERM_CURRENT_MA {
            self.termination_counter = self.termination_counter.saturating_add(1);
            if self.termination_counter > 3 {
                log::info!("charge terminated");
                hi_z(&mut self.pins, true);
                wait_ticks(delay, yield_point, OUTPUT_SETTLE_TICKS);
            }
        } else {
            self.termination_counter = 0;
        }
    }
}

/// Waits out whole loop ticks, handing each one to `yield_point`.
fn wait_ticks<D: DelayNs>(delay: &mut D, yield_point: &mut impl FnMut(), ticks: u32) {
    for _ in 0..ticks {
        delay.delay_ms(CONTROL_TICK_MS);
        yield_point();
    }
}

/// Maximum charge power permitted by the source and the board thermals.
///
/// Derates the negotiated input power by the assumed conversion
/// efficiency, clamps it to the board ceiling and throttles it against
/// the controller temperature.
fn charge_power_mw(vbus_mv: u32, max_input_ma: u32, max_input_mw: u32, temp_c: i32) -> u32 {
    let mut power_mw = (vbus_mv as f32 / 1000.0) * max_input_ma as f32 * ASSUME_EFFICIENCY;

    if power_mw > MAX_CHARGING_POWER_MW as f32 {
        power_mw = MAX_CHARGING_POWER_MW as f32;
    }
    if power_mw > max_input_mw as f32 {
        power_mw = max_input_mw as f32 * ASSUME_EFFICIENCY;
    }

    if temp_c > TEMP_THROTTLE_THRESH_C {
        power_mw *= thermal_scalar(temp_c);
    }

    power_mw as u32
}

/// Thermal derating scalar: 1 below 50 °C, falling to 0 towards 80 °C.
fn thermal_scalar(temp_c: i32) -> f32 {
    let scalar = 1.0 - (0.0333 * temp_c as f32 - 1.66);
    if scalar > 1.0 {
        1.0
    } else if scalar < 0.0 {
        0.0
    } else {
        scalar
    }
}
