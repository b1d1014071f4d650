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

//! Input power supply collaborator.

/// Readiness of the negotiated input supply.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputPowerState {
    /// A USB PD contract is in place and the source is ready.
    Ready,
    /// Negotiation is pending or the contract was lost.
    #[default]
    NotReady,
    /// The attached source does not speak USB PD.
    NoPdSupply,
}

/// View of the USB PD negotiation result.
///
/// Implemented by the PD controller driver of the surrounding firmware.
/// The advertisement is what the source granted in the active contract,
/// not what the pack can accept.
pub trait PowerSource {
    /// Whether the negotiated input power is usable for charging.
    fn input_power_ready(&self) -> InputPowerState;

    /// Maximum input current granted by the source in mA.
    fn max_input_current_ma(&self) -> u32;

    /// Maximum input power granted by the source in mW.
    fn max_input_power_mw(&self) -> u32;
}
