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

//! Battery monitor loop.
//!
//! Detects the pack connections, infers the series cell count from the
//! balance ladder, runs the per-cell safety checks and the passive
//! balancing controller.

use crate::{
    board::{AnalogSampler, BalancePins, BalanceTap},
    cfg::Config,
    charger::RegulatorState,
    fault::{Fault, FaultRegistry},
    limits::{
        CELL_BALANCING_HYSTERESIS_MV, CELL_BALANCING_SCALAR_MAX, CELL_DELTA_V_ENABLE_BALANCING_MV,
        CELL_OVER_VOLTAGE_DISABLE_CHARGING_MV, CELL_OVER_VOLTAGE_ENABLE_DISCHARGE_MV,
        CELL_VOLTAGE_TO_ENABLE_CHARGING_MV, MAX_MCU_TEMP_C_FOR_OPERATION, MCU_TEMP_C_RECOVERY,
        MIN_CELL_VOLTAGE_SAFE_LIMIT_MV, MIN_CELL_V_FOR_BALANCING_MV, VOLTAGE_CONNECTED_THRESHOLD_MV,
    },
    tasks::StateCell,
};

/// Battery state, published once per monitor step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryState {
    /// Main pack connector present.
    pub xt60_connected: bool,
    /// Balance connector present with a valid ladder.
    pub balance_port_connected: bool,
    /// Detected series cell count: 0 (no or invalid pack), 2, 3 or 4.
    pub cell_count: u8,
    /// Balancing controller latch.
    pub balancing_enabled: bool,
    /// Engaged discharge resistors, bit 0 for cell 1 through bit 3 for
    /// cell 4. Mirrors the discharge pins.
    pub cell_balance_mask: u8,
    /// A cell is above the hard over-voltage limit.
    pub cell_over_voltage: bool,
    /// The pack is connected and below its charge enable voltage.
    pub requires_charging: bool,
}

/// Battery monitor loop instance.
pub struct BatteryMonitor<'a, S, P> {
    sampler: &'a S,
    pins: P,
    faults: &'a FaultRegistry,
    cfg: Config,
    regulator: &'a StateCell<RegulatorState>,
    readout: &'a StateCell<BatteryState>,
    state: BatteryState,
    ladder: u8,
}

impl<'a, S: AnalogSampler, P: BalancePins> BatteryMonitor<'a, S, P> {
    /// Creates the monitor.
    ///
    /// `regulator` is the controller's readout; `readout` is where this
    /// monitor publishes its own state.
    pub fn new(
        sampler: &'a S, pins: P, faults: &'a FaultRegistry, cfg: Config,
        regulator: &'a StateCell<RegulatorState>, readout: &'a StateCell<BatteryState>,
    ) -> Self {
        Self { sampler, pins, faults, cfg, regulator, readout, state: Default::default(), ladder: 0 }
    }

    /// Returns a copy of the current battery state.
    pub fn state(&self) -> BatteryState {
        self.state
    }

    /// Runs one monitor iteration.
    pub fn step(&mut self) {
        let pack_mv = self.sampler.pack_voltage_mv();
        self.state.xt60_connected = pack_mv > VOLTAGE_CONNECTED_THRESHOLD_MV;

        if self.cfg.enable_balancing {
            self.probe_ladder();
        } else {
            self.state.cell_count = self.cfg.num_series;
            self.state.balance_port_connected = true;
            self.faults.clear(Fault::CellConnection);
        }

        self.check_temperature();

        if self.cfg.enable_balancing {
            self.check_cell_voltages();

            // Charge current through the pack skews the per-cell readings,
            // so balancing decisions wait for the regulator to go quiet.
            if !self.regulator.get().charging {
                self.balance();
            }
        }

        self.state.requires_charging = self.state.xt60_connected
            && self.state.balance_port_connected
            && pack_mv < self.state.cell_count as u32 * CELL_VOLTAGE_TO_ENABLE_CHARGING_MV;

        self.readout.set(self.state);
    }

    /// Probes the balance ladder and infers the series cell count.
    ///
    /// A tap counts as connected when both the ladder voltage and the
    /// derived cell voltage are present. The highest connected tap gives
    /// the candidate count, accepted only when every lower tap is also
    /// connected; a gap invalidates the pack.
    fn probe_ladder(&mut self) {
        let threshold = VOLTAGE_CONNECTED_THRESHOLD_MV;
        let sampler = self.sampler;
        let mut mask = self.ladder;

        let mut probe = |bit: u8, connected: bool| {
            if connected {
                mask |= 1 << bit;
            } else {
                mask &= !(1 << bit);
            }
        };
        probe(
            3,
            sampler.tap_voltage_mv(BalanceTap::FourS) > threshold
                && sampler.cell_voltage_mv(3) > threshold,
        );
        probe(
            2,
            sampler.tap_voltage_mv(BalanceTap::ThreeS) > threshold
                && sampler.cell_voltage_mv(2) > threshold,
        );
        probe(
            1,
            sampler.tap_voltage_mv(BalanceTap::TwoS) > threshold
                && sampler.cell_voltage_mv(1) > threshold,
        );
        probe(0, sampler.cell_voltage_mv(0) > threshold);
        self.ladder = mask;

        let (count, gap) = if mask & 0b1000 != 0 {
            if mask & 0b0111 == 0b0111 {
                (4, false)
            } else {
                (0, true)
            }
        } else if mask & 0b0100 != 0 {
            if mask & 0b0011 == 0b0011 {
                (3, false)
            } else {
                (0, true)
            }
        } else if mask & 0b0010 != 0 {
            if mask & 0b0001 == 0b0001 {
                (2, false)
            } else {
                (0, true)
            }
        } else {
            // At most the first cell visible; a single cell pack is not
            // supported, but an empty ladder is not an error either.
            (0, false)
        };

        if gap {
            self.faults.set(Fault::CellConnection);
        } else {
            self.faults.clear(Fault::CellConnection);
        }

        if count != self.state.cell_count {
            log::info!("balance ladder: {} series cells", count);
        }
        self.state.cell_count = count;
        self.state.balance_port_connected = count > 1;
    }

    /// Controller temperature check with one-sided hysteresis.
    fn check_temperature(&mut self) {
        let temp_c = self.sampler.controller_temperature_c();
        if temp_c > MAX_MCU_TEMP_C_FOR_OPERATION {
            self.faults.set(Fault::ControllerOverTemperature);
        } else if self.faults.has(Fault::ControllerOverTemperature) && temp_c < MCU_TEMP_C_RECOVERY {
            self.faults.clear(Fault::ControllerOverTemperature);
        }
    }

    /// Hard per-cell voltage limits.
    fn check_cell_voltages(&mut self) {
        let mut over_voltage = false;
        let mut under_voltage = false;
        for cell in 0..self.state.cell_count as usize {
            let mv = self.sampler.cell_voltage_mv(cell);
            if mv > CELL_OVER_VOLTAGE_DISABLE_CHARGING_MV {
                over_voltage = true;
            }
            if mv < MIN_CELL_VOLTAGE_SAFE_LIMIT_MV {
                under_voltage = true;
            }
        }

        if under_voltage {
            self.faults.set(Fault::CellVoltage);
        } else {
            self.faults.clear(Fault::CellVoltage);
        }
        self.state.cell_over_voltage = over_voltage;
    }

    /// Balancing controller.
    fn balance(&mut self) {
        if !self.state.balance_port_connected || self.faults.any() {
            self.pins.set_cell_discharge(0);
            self.state.balancing_enabled = false;
            self.state.cell_balance_mask = 0;
            return;
        }

        let count = self.state.cell_count as usize;
        let mut vmin = self.sampler.cell_voltage_mv(0);
        let mut vmax = vmin;
        for cell in 1..count {
            let mv = self.sampler.cell_voltage_mv(cell);
            vmin = vmin.min(mv);
            vmax = vmax.max(mv);
        }

        // With the charger attached the thresholds start relaxed and
        // tighten linearly as the pack fills, so balancing near full is
        // exact without throttling the charge of an unbalanced empty pack.
        let scalar = if self.state.xt60_connected {
            let span = (CELL_VOLTAGE_TO_ENABLE_CHARGING_MV - MIN_CELL_V_FOR_BALANCING_MV) as f32;
            let scalar = CELL_BALANCING_SCALAR_MAX
                * (1.0 - (vmax as f32 - MIN_CELL_V_FOR_BALANCING_MV as f32) / span);
            if scalar < 1.0 {
                1.0
            } else {
                scalar
            }
        } else {
            1.0
        };

        let delta = (vmax - vmin) as f32;
        if delta >= CELL_DELTA_V_ENABLE_BALANCING_MV as f32 * scalar
            && vmin > MIN_CELL_V_FOR_BALANCING_MV
            && !self.state.balancing_enabled
        {
            log::info!("balancing on, cell delta {} mV", vmax - vmin);
            self.state.balancing_enabled = true;
        } else if (delta < CELL_BALANCING_HYSTERESIS_MV as f32 * scalar
            && self.state.balancing_enabled)
            || vmin < MIN_CELL_V_FOR_BALANCING_MV
        {
            if self.state.balancing_enabled {
                log::info!("balancing off, cell delta {} mV", vmax - vmin);
            }
            self.state.balancing_enabled = false;
        }

        let mut mask = 0;
        for cell in 0..count {
            let mv = self.sampler.cell_voltage_mv(cell);
            if self.state.balancing_enabled
                && (mv - vmin) as f32 >= CELL_BALANCING_HYSTERESIS_MV as f32 * scalar
            {
                mask |= 1 << cell;
            } else if mv >= CELL_OVER_VOLTAGE_ENABLE_DISCHARGE_MV {
                // Discharge an over-voltage cell no matter what the
                // balancing latch says.
                mask |= 1 << cell;
            }
        }
        self.pins.set_cell_discharge(mask);
        self.state.cell_balance_mask = mask;
    }
}
