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

//! Cooperative task harness.
//!
//! The monitor and controller loops run as two periodic actors on one
//! cooperative executor. They interact only through the fault registry and
//! the by-value state readouts below, and all shared bus access is
//! serialized by [`crate::bus::SharedBus`].

use core::cell::Cell;
use embedded_hal::delay::DelayNs;

use crate::{
    battery::BatteryMonitor,
    board::{AnalogSampler, BalancePins, RegulatorPins},
    charger::RegulatorController,
    supply::PowerSource,
};
use embedded_hal::i2c::I2c;

/// Nominal period of both control loops.
pub const CONTROL_TICK_MS: u32 = 250;

/// Published state of one loop, read by the other by value.
///
/// Mutations stay inside the owning loop; everyone else only ever sees a
/// copy taken at a loop boundary.
#[derive(Debug, Default)]
pub struct StateCell<T: Copy>(Cell<T>);

impl<T: Copy> StateCell<T> {
    /// Creates a readout holding `initial`.
    pub const fn new(initial: T) -> Self {
        Self(Cell::new(initial))
    }

    /// Returns a copy of the published state.
    pub fn get(&self) -> T {
        self.0.get()
    }

    /// Publishes a new state.
    pub fn set(&self, state: T) {
        self.0.set(state)
    }
}

/// Drives the battery monitor and the regulator controller.
pub struct Harness<'a, I2C, RP, BP, S, U> {
    monitor: BatteryMonitor<'a, S, BP>,
    controller: RegulatorController<'a, I2C, RP, S, U>,
}

impl<'a, I2C, RP, BP, S, U> Harness<'a, I2C, RP, BP, S, U>
where
    I2C: I2c,
    RP: RegulatorPins,
    BP: BalancePins,
    S: AnalogSampler,
    U: PowerSource,
{
    /// Creates the harness around the two constructed loops.
    pub fn new(
        monitor: BatteryMonitor<'a, S, BP>, controller: RegulatorController<'a, I2C, RP, S, U>,
    ) -> Self {
        Self { monitor, controller }
    }

    /// Runs the controller startup sequence.
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) {
        self.controller.init(delay);
    }

    /// Runs one tick: monitor step, controller step, then the tick delay.
    ///
    /// The controller's cooperative waits (UVP recovery, output toggles)
    /// hand their ticks back here, so the monitor keeps its cadence and
    /// its safety checks stay live while the controller holds the CPU.
    pub fn tick<D: DelayNs>(&mut self, delay: &mut D) {
        let Self { monitor, controller } = self;
        monitor.step();
        controller.step(delay, &mut || monitor.step());
        delay.delay_ms(CONTROL_TICK_MS);
    }

    /// Runs the loops forever.
    pub fn run<D: DelayNs>(&mut self, delay: &mut D) -> ! {
        self.init(delay);
        loop {
            self.tick(delay);
        }
    }
}
