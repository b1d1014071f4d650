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

//! Electrical and thermal limits.

/// Voltage above which a pack terminal or balance tap counts as connected.
///
/// A floating divider input reads near ground; even a deeply discharged
/// cell sits well above this.
pub const VOLTAGE_CONNECTED_THRESHOLD_MV: u32 = 500;

/// Per-cell voltage below which the pack still accepts charge.
///
/// Above `cells * this` the pack is considered full enough that charging
/// is no longer requested.
pub const CELL_VOLTAGE_TO_ENABLE_CHARGING_MV: u32 = 4100;

/// Minimum cell voltage for balancing to operate.
///
/// Discharging a cell below this would fight the charger during recovery
/// of a deeply discharged pack.
pub const MIN_CELL_V_FOR_BALANCING_MV: u32 = 3300;

/// Cell delta that turns the balancing controller on, before scaling.
pub const CELL_DELTA_V_ENABLE_BALANCING_MV: u32 = 10;

/// Cell delta hysteresis that keeps balancing on, before scaling.
///
/// Also the per-cell engage threshold above the lowest cell while
/// balancing is latched on.
pub const CELL_BALANCING_HYSTERESIS_MV: u32 = 5;

/// Maximum relaxation of the balancing thresholds.
///
/// At the balancing floor the thresholds are this many times wider than at
/// the charge-enable voltage, so balancing near full is tight and
/// balancing on an empty pack does not throttle charging.
pub const CELL_BALANCING_SCALAR_MAX: f32 = 10.0;

/// Cell voltage at which the discharge resistor engages unconditionally.
pub const CELL_OVER_VOLTAGE_ENABLE_DISCHARGE_MV: u32 = 4200;

/// Hard per-cell over-voltage limit. Charging is disabled above this.
pub const CELL_OVER_VOLTAGE_DISABLE_CHARGING_MV: u32 = 4250;

/// Hard per-cell under-voltage limit. Raises a cell voltage fault below.
pub const MIN_CELL_VOLTAGE_SAFE_LIMIT_MV: u32 = 2500;

/// Per-cell voltage under which the pack is treated as UVP-latched and the
/// recovery precharge runs.
pub const CELL_UVP_RECOVERY_MV: u32 = 3100;

/// Per-cell voltage above which the battery is assumed disconnected while
/// the output is on. The regulator output floats high without a pack.
pub const BATTERY_DISCONNECT_THRESH_MV: u32 = 4300;

/// Controller temperature that raises the over-temperature fault.
pub const MAX_MCU_TEMP_C_FOR_OPERATION: i32 = 80;

/// Controller temperature the over-temperature fault clears below.
pub const MCU_TEMP_C_RECOVERY: i32 = 60;

/// Controller temperature above which charge power is throttled.
pub const TEMP_THROTTLE_THRESH_C: i32 = 20;

/// Ceiling on charge power drawn through the regulator.
pub const MAX_CHARGING_POWER_MW: u32 = 100_000;

/// Hard ceiling on the commanded charge current.
///
/// Board thermal design limit; the register itself tops out at 8128 mA.
pub const MAX_CHARGE_CURRENT_MA: u32 = 6000;

/// Fraction of the negotiated input power assumed to reach the pack.
/// Keeps the converter from overloading the source.
pub const ASSUME_EFFICIENCY: f32 = 0.9;

/// Charge current commanded during UVP recovery precharge.
pub const UVP_RECOVERY_CURRENT_MA: u32 = 128;

/// Measured charge current under which charge termination counts down.
pub const CHARGE_TERM_CURRENT_MA: u32 = 100;

/// Outer UVP recovery attempts before giving up, once per boot.
pub const UVP_RECOVERY_ATTEMPTS: u16 = 300;
