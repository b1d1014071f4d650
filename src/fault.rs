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

//! Fault registry shared by the control loops.

use core::sync::atomic::{AtomicU8, Ordering};

/// Fault condition.
///
/// Every fault is level triggered and owned by exactly one component:
/// the owner raises it and only the owner clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Fault {
    /// Communication with the charge regulator failed or its ids mismatch.
    RegulatorCommunication = 1 << 0,
    /// The regulator reports its input outside the operating window.
    VoltageInput = 1 << 1,
    /// The balance ladder has a gap in the cell series.
    CellConnection = 1 << 2,
    /// A cell is below its hard under-voltage limit.
    CellVoltage = 1 << 3,
    /// The charge controller MCU is over temperature.
    ControllerOverTemperature = 1 << 4,
}

/// Set of active faults.
///
/// An atomic bitset, safe to share between the monitor and controller
/// loops. While any fault is active the controller keeps the regulator
/// output in high impedance with zeroed setpoints.
#[derive(Debug, Default)]
pub struct FaultRegistry {
    active: AtomicU8,
}

impl FaultRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self { active: AtomicU8::new(0) }
    }

    /// Raises a fault.
    pub fn set(&self, fault: Fault) {
        let prev = self.active.fetch_or(fault as u8, Ordering::Relaxed);
        if prev & fault as u8 == 0 {
            log::warn!("fault raised: {:?}", fault);
        }
    }

    /// Clears a fault.
    pub fn clear(&self, fault: Fault) {
        let prev = self.active.fetch_and(!(fault as u8), Ordering::Relaxed);
        if prev & fault as u8 != 0 {
            log::info!("fault cleared: {:?}", fault);
        }
    }

    /// Whether the given fault is active.
    pub fn has(&self, fault: Fault) -> bool {
        self.active.load(Ordering::Relaxed) & fault as u8 != 0
    }

    /// Whether any fault is active.
    pub fn any(&self) -> bool {
        self.active.load(Ordering::Relaxed) != 0
    }
}
