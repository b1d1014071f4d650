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

//! Configuration.

/// Fixed-voltage charging setpoints.
///
/// Overrides the per-cell-count voltage tables with a raw register
/// setpoint, for chemistries the tables do not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedVoltage {
    /// Target charge voltage in mV.
    pub setpoint_mv: u16,
    /// Fast-charge threshold in mV, written as the minimum system voltage.
    pub precharge_mv: u16,
}

/// Charger core configuration, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Sense the balance ladder and run the balancing controller.
    ///
    /// When off, the pack is assumed to be `num_series` cells on the main
    /// connector only and per-cell checks are skipped.
    pub enable_balancing: bool,
    /// Series cell count assumed for UVP recovery and for charging when
    /// balancing is disabled. 2 to 4.
    pub num_series: u8,
    /// Attempt to wake a UVP-latched pack with a bounded precharge at boot.
    pub attempt_uvp_recovery: bool,
    /// Fixed-voltage charging instead of the cell-count tables.
    pub fixed_voltage: Option<FixedVoltage>,
}

impl Default for Config {
    fn default() -> Self {
        Self { enable_balancing: true, num_series: 4, attempt_uvp_recovery: true, fixed_voltage: None }
    }
}
