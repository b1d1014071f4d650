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

//! Board collaborator traits.
//!
//! The surrounding firmware implements these against its ADC frontend and
//! GPIO blocks; the core stays platform independent.

/// Balance ladder tap above the first cell.
///
/// Tap voltages are the cumulative series voltages at the balance
/// connector; the per-cell voltages are derived from adjacent taps by the
/// analog frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BalanceTap {
    /// Tap above the second cell.
    TwoS,
    /// Tap above the third cell.
    ThreeS,
    /// Tap above the fourth cell.
    FourS,
}

/// Analog measurements of the pack and the controller.
pub trait AnalogSampler {
    /// Pack voltage at the main connector in mV.
    fn pack_voltage_mv(&self) -> u32;

    /// Voltage of a single cell in mV. `cell` is 0 to 3.
    fn cell_voltage_mv(&self, cell: usize) -> u32;

    /// Cumulative voltage at a balance ladder tap in mV.
    fn tap_voltage_mv(&self, tap: BalanceTap) -> u32;

    /// Charge controller MCU temperature in °C.
    fn controller_temperature_c(&self) -> i32;
}

/// Regulator-side control lines.
pub trait RegulatorPins {
    /// Drives the ILIM_HIZ line. High enables the regulator output.
    fn set_ilim_hiz(&mut self, high: bool);

    /// Fan control. The pin itself is active low; implementors hide the
    /// inversion.
    fn set_fan(&mut self, on: bool);

    /// Drives the EN_OTG line.
    fn set_otg(&mut self, high: bool);

    /// Reads the regulator's CHRG_OK output. Low means VBUS is outside
    /// the operating window.
    fn charge_ok(&self) -> bool;
}

/// Cell discharge resistor control lines.
pub trait BalancePins {
    /// Engages the discharge resistors given in `mask`, bit 0 for cell 1
    /// through bit 3 for cell 4. Bits outside the mask are disengaged.
    fn set_cell_discharge(&mut self, mask: u8);
}
