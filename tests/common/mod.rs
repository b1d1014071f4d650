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

//! Test doubles for the control loop scenarios: a scripted regulator on a
//! fake bus, plus stub board collaborators.

#![allow(dead_code)]

use std::{cell::Cell, cell::RefCell, collections::VecDeque, rc::Rc};

use embedded_hal::{
    delay::DelayNs,
    i2c::{ErrorKind, ErrorType, I2c, Operation},
};
use pack_charger::{
    AnalogSampler, BalancePins, BalanceTap, InputPowerState, PowerSource, RegulatorPins,
};

/// Behavioral model of the regulator behind the fake bus.
pub struct RegulatorModel {
    /// Register file.
    pub regs: [u8; 256],
    /// Every register write performed, as `(register, bytes)`.
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Busy polls left before the current ADC conversion completes.
    pub adc_busy_polls: u8,
    /// Busy polls per started ADC conversion.
    pub adc_poll_latency: u8,
    /// Errors to return for the next transactions, one per transaction.
    pub errors: VecDeque<ErrorKind>,
}

impl Default for RegulatorModel {
    fn default() -> Self {
        Self {
            regs: [0; 256],
            writes: Vec::new(),
            adc_busy_polls: 0,
            adc_poll_latency: 0,
            errors: VecDeque::new(),
        }
    }
}

const REG_CHARGE_STATUS_HI: usize = 0x21;
const REG_ADC_VBUS: usize = 0x27;
const REG_ADC_ICHG: usize = 0x2a;
const REG_ADC_VBAT: usize = 0x2c;
const REG_MANUFACTURER_ID: usize = 0x2e;
const REG_DEVICE_ID: usize = 0x2f;
const REG_ADC_OPTION_HI: usize = 0x3b;

/// Shared-handle fake I2C bus fronting a [`RegulatorModel`].
#[derive(Clone, Default)]
pub struct FakeBus(pub Rc<RefCell<RegulatorModel>>);

impl FakeBus {
    /// A regulator that answers the identity probe.
    pub fn connected() -> Self {
        let bus = Self::default();
        {
            let mut model = bus.0.borrow_mut();
            model.regs[REG_MANUFACTURER_ID] = 0x40;
            model.regs[REG_DEVICE_ID] = 0x78;
        }
        bus
    }

    /// Sets the VBAT ADC result register from a voltage.
    pub fn set_vbat_mv(&self, mv: u32) {
        self.0.borrow_mut().regs[REG_ADC_VBAT] = ((mv - 2880) / 64) as u8;
    }

    /// Sets the VBUS ADC result register from a voltage.
    pub fn set_vbus_mv(&self, mv: u32) {
        self.0.borrow_mut().regs[REG_ADC_VBUS] = ((mv - 3200) / 64) as u8;
    }

    /// Sets the charge current ADC result register from a current.
    pub fn set_charge_current_ma(&self, ma: u32) {
        self.0.borrow_mut().regs[REG_ADC_ICHG] = (ma / 64) as u8;
    }

    /// Sets the charging-active status bit.
    pub fn set_charging(&self, charging: bool) {
        let mut model = self.0.borrow_mut();
        if charging {
            model.regs[REG_CHARGE_STATUS_HI] |= 1 << 2;
        } else {
            model.regs[REG_CHARGE_STATUS_HI] &= !(1 << 2);
        }
    }

    /// Fails the next `count` transactions with `kind`.
    pub fn fail_next(&self, count: usize, kind: ErrorKind) {
        let mut model = self.0.borrow_mut();
        for _ in 0..count {
            model.errors.push_back(kind);
        }
    }

    /// All writes performed to `reg`, in order.
    pub fn writes_to(&self, reg: u8) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// The last write performed to `reg`.
    pub fn last_write(&self, reg: u8) -> Option<Vec<u8>> {
        self.writes_to(reg).pop()
    }
}

impl ErrorType for FakeBus {
    type Error = ErrorKind;
}

impl I2c for FakeBus {
    fn transaction(
        &mut self, _address: u8, operations: &mut [Operation<'_>],
    ) -> Result<(), ErrorKind> {
        let mut model = self.0.borrow_mut();
        if let Some(err) = model.errors.pop_front() {
            return Err(err);
        }

        let mut pointer = 0;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    pointer = bytes[0] as usize;
                    if bytes.len() > 1 {
                        let data = bytes[1..].to_vec();
                        for (i, &value) in data.iter().enumerate() {
                            model.regs[pointer + i] = value;
                        }
                        if pointer == REG_ADC_OPTION_HI && data[0] & (1 << 6) != 0 {
                            model.adc_busy_polls = model.adc_poll_latency;
                        }
                        model.writes.push((pointer as u8, data));
                    }
                }
                Operation::Read(buf) => {
                    for (i, slot) in buf.iter_mut().enumerate() {
                        let reg = pointer + i;
                        let mut value = model.regs[reg];
                        if reg == REG_ADC_OPTION_HI {
                            if model.adc_busy_polls > 0 {
                                model.adc_busy_polls -= 1;
                                value |= 1 << 6;
                            } else {
                                value &= !(1 << 6);
                            }
                        }
                        *slot = value;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Analog frontend stub.
#[derive(Default)]
pub struct StubSampler {
    pub pack_mv: Cell<u32>,
    pub cells_mv: RefCell<[u32; 4]>,
    pub taps_mv: RefCell<[u32; 3]>,
    pub temp_c: Cell<i32>,
}

impl StubSampler {
    /// A healthy pack with the given cell voltages.
    pub fn pack(cells_mv: &[u32]) -> Self {
        let sampler = Self::default();
        sampler.temp_c.set(25);
        let mut sum = 0;
        for (i, &mv) in cells_mv.iter().enumerate() {
            sampler.cells_mv.borrow_mut()[i] = mv;
            sum += mv;
            if i >= 1 {
                sampler.taps_mv.borrow_mut()[i - 1] = sum;
            }
        }
        sampler.pack_mv.set(sum);
        sampler
    }
}

impl AnalogSampler for StubSampler {
    fn pack_voltage_mv(&self) -> u32 {
        self.pack_mv.get()
    }

    fn cell_voltage_mv(&self, cell: usize) -> u32 {
        self.cells_mv.borrow()[cell]
    }

    fn tap_voltage_mv(&self, tap: BalanceTap) -> u32 {
        let taps = self.taps_mv.borrow();
        match tap {
            BalanceTap::TwoS => taps[0],
            BalanceTap::ThreeS => taps[1],
            BalanceTap::FourS => taps[2],
        }
    }

    fn controller_temperature_c(&self) -> i32 {
        self.temp_c.get()
    }
}

/// USB PD source stub.
pub struct StubSupply {
    pub state: Cell<InputPowerState>,
    pub max_current_ma: Cell<u32>,
    pub max_power_mw: Cell<u32>,
}

impl StubSupply {
    /// A ready PD contract.
    pub fn contract(max_current_ma: u32, max_power_mw: u32) -> Self {
        Self {
            state: Cell::new(InputPowerState::Ready),
            max_current_ma: Cell::new(max_current_ma),
            max_power_mw: Cell::new(max_power_mw),
        }
    }

    /// No usable contract.
    pub fn not_ready() -> Self {
        Self {
            state: Cell::new(InputPowerState::NotReady),
            max_current_ma: Cell::new(0),
            max_power_mw: Cell::new(0),
        }
    }
}

impl PowerSource for StubSupply {
    fn input_power_ready(&self) -> InputPowerState {
        self.state.get()
    }

    fn max_input_current_ma(&self) -> u32 {
        self.max_current_ma.get()
    }

    fn max_input_power_mw(&self) -> u32 {
        self.max_power_mw.get()
    }
}

/// Regulator-side pin state.
pub struct PinLog {
    /// ILIM_HIZ level: high means the output is enabled.
    pub ilim_hiz: bool,
    /// Fan running.
    pub fan: bool,
    /// EN_OTG level.
    pub otg: bool,
    /// CHRG_OK input level.
    pub charge_ok: bool,
    /// Every ILIM_HIZ level commanded, in order.
    pub hiz_history: Vec<bool>,
}

impl Default for PinLog {
    fn default() -> Self {
        Self { ilim_hiz: false, fan: false, otg: false, charge_ok: true, hiz_history: Vec::new() }
    }
}

/// Shared-handle stub of the regulator control pins.
#[derive(Clone, Default)]
pub struct StubRegulatorPins(pub Rc<RefCell<PinLog>>);

impl RegulatorPins for StubRegulatorPins {
    fn set_ilim_hiz(&mut self, high: bool) {
        let mut pins = self.0.borrow_mut();
        pins.ilim_hiz = high;
        pins.hiz_history.push(high);
    }

    fn set_fan(&mut self, on: bool) {
        self.0.borrow_mut().fan = on;
    }

    fn set_otg(&mut self, high: bool) {
        self.0.borrow_mut().otg = high;
    }

    fn charge_ok(&self) -> bool {
        self.0.borrow().charge_ok
    }
}

/// Shared-handle stub of the discharge resistor pins.
#[derive(Clone, Default)]
pub struct StubBalancePins(pub Rc<Cell<u8>>);

impl BalancePins for StubBalancePins {
    fn set_cell_discharge(&mut self, mask: u8) {
        self.0.set(mask);
    }
}

/// Delay that only accounts time instead of sleeping.
#[derive(Default)]
pub struct TestDelay {
    pub total_ns: u64,
}

impl DelayNs for TestDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

impl TestDelay {
    /// Accumulated delay in ms.
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}
