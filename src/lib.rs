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

//! Charger core for USB PD multi-cell lithium battery packs.
//!
//! Drives a BQ25703A buck-boost charge regulator over I2C, senses pack and
//! per-cell voltages through the board's analog frontend, infers the pack
//! configuration from the balance ladder, balances cells and gates the
//! regulator output against the fault state and the negotiated USB PD input
//! power.
//!
//! The core is built from two cooperative periodic loops:
//!
//! * [`battery::BatteryMonitor`]: pack connectivity, cell count inference,
//!   per-cell safety checks and passive balancing.
//! * [`charger::RegulatorController`]: regulator probing, ADC harvesting,
//!   under-voltage recovery precharge, charge envelope computation and
//!   output gating.
//!
//! Both loops communicate through the [`fault::FaultRegistry`] and by-value
//! state readouts and are driven by [`tasks::Harness`]. All hardware access
//! goes through the collaborator traits in [`board`] and [`supply`] and the
//! [`embedded_hal`] I2C and delay traits, so the crate itself stays
//! platform independent.

#![cfg_attr(not(test), no_std)]

pub mod battery;
pub mod board;
pub mod bq25703a;
pub mod bus;
pub mod cfg;
pub mod charger;
pub mod fault;
pub mod limits;
pub mod supply;
pub mod tasks;

pub use crate::{
    battery::{BatteryMonitor, BatteryState},
    board::{AnalogSampler, BalancePins, BalanceTap, RegulatorPins},
    bq25703a::Bq25703a,
    bus::SharedBus,
    cfg::{Config, FixedVoltage},
    charger::{RegulatorController, RegulatorState},
    fault::{Fault, FaultRegistry},
    supply::{InputPowerState, PowerSource},
    tasks::{Harness, StateCell},
};
