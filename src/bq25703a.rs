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

//! BQ25703A buck-boost battery charge regulator driver.

use embedded_hal::{
    delay::DelayNs,
    i2c::{Error as _, ErrorKind, I2c},
};
use heapless::Vec;

use crate::{
    board::RegulatorPins,
    bus::SharedBus,
    cfg::FixedVoltage,
    fault::{Fault, FaultRegistry},
    limits::MAX_CHARGE_CURRENT_MA,
};

/// BQ25703A error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The bus lease or the NAK retry budget timed out.
    Timeout,
    /// I2C communication error.
    I2c,
    /// The ADC conversion did not finish within the poll limit.
    AdcBusy,
}

/// BQ25703A result.
pub type Result<T> = core::result::Result<T, Error>;

/// Result of an identity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Connection {
    /// Manufacturer and device ids matched.
    Connected,
    /// The probe failed or the ids mismatched.
    NotConnected,
}

impl Connection {
    /// Whether the regulator responded with the expected ids.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// One harvested set of regulator ADC samples.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcReadings {
    /// Battery voltage in mV.
    pub vbat_mv: u32,
    /// System voltage in mV.
    pub vsys_mv: u32,
    /// Input voltage in mV.
    pub vbus_mv: u32,
    /// Charge current in mA.
    pub charge_current_ma: u32,
    /// Input current in mA.
    pub input_current_ma: u32,
}

/// BQ25703A charge regulator instance.
///
/// All bus traffic runs under the shared bus lease. A NAKing device is
/// retried inside a fixed budget; any other transport failure raises
/// [`Fault::RegulatorCommunication`] and surfaces as an error, which
/// callers treat by skipping the dependent actions of their iteration.
pub struct Bq25703a<'a, I2C> {
    bus: &'a SharedBus<I2C>,
    faults: &'a FaultRegistry,
    fixed_voltage: Option<FixedVoltage>,
}

impl<'a, I2C: I2c> Bq25703a<'a, I2C> {
    /// Creates a new regulator instance on the shared bus.
    ///
    /// `fixed_voltage` overrides the cell-count voltage tables when set.
    pub fn new(
        bus: &'a SharedBus<I2C>, faults: &'a FaultRegistry, fixed_voltage: Option<FixedVoltage>,
    ) -> Self {
        log::info!("BQ25703A regulator at bus address 0x{:x}", I2C_ADDR);
        Self { bus, faults, fixed_voltage }
    }

    /// Raises the communication fault and passes the error on.
    fn comm_failure(&self, error: Error) -> Error {
        self.faults.set(Fault::RegulatorCommunication);
        error
    }

    /// Performs one bus write, retrying while the device NAKs.
    fn transfer<D: DelayNs>(&self, delay: &mut D, data: &[u8]) -> Result<()> {
        let mut bus = self.bus.lease(delay).map_err(|_| self.comm_failure(Error::Timeout))?;
        let mut waited_ms = 0;
        loop {
            match bus.write(I2C_ADDR, data) {
                Ok(()) => return Ok(()),
                Err(err) if matches!(err.kind(), ErrorKind::NoAcknowledge(_)) => {
                    if waited_ms >= NAK_RETRY_BUDGET_MS {
                        return Err(self.comm_failure(Error::Timeout));
                    }
                    delay.delay_ms(1);
                    waited_ms += 1;
                }
                Err(_) => return Err(self.comm_failure(Error::I2c)),
            }
        }
    }

    /// Reads register(s) starting at `reg`.
    fn read<D: DelayNs, const N: usize>(&self, delay: &mut D, reg: u8) -> Result<[u8; N]> {
        let mut buf = [0; N];
        let mut bus = self.bus.lease(delay).map_err(|_| self.comm_failure(Error::Timeout))?;
        let mut waited_ms = 0;
        loop {
            match bus.write_read(I2C_ADDR, &[reg], &mut buf) {
                Ok(()) => return Ok(buf),
                Err(err) if matches!(err.kind(), ErrorKind::NoAcknowledge(_)) => {
                    if waited_ms >= NAK_RETRY_BUDGET_MS {
                        return Err(self.comm_failure(Error::Timeout));
                    }
                    delay.delay_ms(1);
                    waited_ms += 1;
                }
                Err(_) => return Err(self.comm_failure(Error::I2c)),
            }
        }
    }

    /// Writes register(s) starting at `reg`.
    fn write<D: DelayNs>(&self, delay: &mut D, reg: u8, data: &[u8]) -> Result<()> {
        let mut buf: Vec<u8, 4> = Vec::new();
        let _ = buf.push(reg);
        buf.extend(data.iter().copied());
        self.transfer(delay, &buf)
    }

    /// Writes a two-byte register, LSB first.
    fn write_u16<D: DelayNs>(&self, delay: &mut D, reg: u8, value: u16) -> Result<()> {
        self.write(delay, reg, &[value as u8, (value >> 8) as u8])
    }

    /// Probes the manufacturer and device ids.
    ///
    /// Clears [`Fault::RegulatorCommunication`] on a match; raises it on a
    /// mismatch or a bus failure.
    pub fn identify<D: DelayNs>(&self, delay: &mut D) -> Connection {
        let manufacturer: Result<[u8; 1]> = self.read(delay, REG_MANUFACTURER_ID);
        let device: Result<[u8; 1]> = self.read(delay, REG_DEVICE_ID);

        match (manufacturer, device) {
            (Ok([m]), Ok([d])) if m == MANUFACTURER_ID && d == DEVICE_ID => {
                self.faults.clear(Fault::RegulatorCommunication);
                Connection::Connected
            }
            (Ok([m]), Ok([d])) => {
                log::warn!("unexpected regulator ids: manufacturer 0x{:02x} device 0x{:02x}", m, d);
                self.faults.set(Fault::RegulatorCommunication);
                Connection::NotConnected
            }
            _ => Connection::NotConnected,
        }
    }

    /// Enables the ADC channels.
    pub fn set_adc_option<D: DelayNs>(&self, delay: &mut D) -> Result<()> {
        self.write(delay, REG_ADC_OPTION, &[ADC_ENABLE_MASK])
    }

    /// Writes the fixed operating mode bitfield.
    pub fn set_charge_option_0<D: DelayNs>(&self, delay: &mut D) -> Result<()> {
        self.write(delay, REG_CHARGE_OPTION_0, &[CHARGE_OPTION_0_LO, CHARGE_OPTION_0_HI])
    }

    /// Triggers one ADC conversion and harvests the sample registers.
    ///
    /// Polls the start bit with one 80 ms cooperative wait per poll until
    /// the conversion finishes.
    pub fn read_adc<D: DelayNs>(&self, delay: &mut D) -> Result<AdcReadings> {
        self.write(delay, REG_ADC_OPTION + 1, &[ADC_START_CONVERSION])?;

        let mut option_hi = ADC_START_CONVERSION;
        let mut polls = 0;
        while option_hi & ADC_START_CONVERSION != 0 {
            if polls >= ADC_POLL_LIMIT {
                log::warn!("regulator ADC conversion did not finish");
                return Err(Error::AdcBusy);
            }
            delay.delay_ms(ADC_POLL_MS);
            let buf: [u8; 1] = self.read(delay, REG_ADC_OPTION + 1)?;
            option_hi = buf[0];
            polls += 1;
        }

        let [vbat]: [u8; 1] = self.read(delay, REG_ADC_VBAT)?;
        let [vsys]: [u8; 1] = self.read(delay, REG_ADC_VSYS)?;
        let [ichg]: [u8; 1] = self.read(delay, REG_ADC_ICHG)?;
        let [iin]: [u8; 1] = self.read(delay, REG_ADC_IIN)?;
        let [vbus]: [u8; 1] = self.read(delay, REG_ADC_VBUS)?;

        let readings = AdcReadings {
            vbat_mv: 2880 + vbat as u32 * 64,
            vsys_mv: 2880 + vsys as u32 * 64,
            vbus_mv: 3200 + vbus as u32 * 64,
            charge_current_ma: ichg as u32 * 64,
            input_current_ma: iin as u32 * 50,
        };
        log::trace!("regulator ADC samples: {:?}", readings);
        Ok(readings)
    }

    /// Reads the charge status register. Returns whether charging is active.
    pub fn read_charge_status<D: DelayNs>(&self, delay: &mut D) -> Result<bool> {
        let status: [u8; 2] = self.read(delay, REG_CHARGE_STATUS)?;
        Ok(status[1] & CHARGING_ACTIVE_MASK != 0)
    }

    /// Sets the charge voltage for the given series cell count.
    ///
    /// `cells` of 0 zeroes the setpoint and disables charging. A fixed
    /// voltage configuration overrides the tables for any connected pack.
    pub fn set_charge_voltage<D: DelayNs>(&self, delay: &mut D, cells: u8) -> Result<()> {
        let (max_charge_mv, min_sys_mv) = match self.fixed_voltage {
            Some(fixed) if cells > 0 => (fixed.setpoint_mv, fixed.precharge_mv),
            _ => {
                let idx = if cells <= 4 { cells as usize } else { 0 };
                (CHARGE_VOLTAGE_MV[idx], MIN_SYSTEM_VOLTAGE_MV[idx])
            }
        };
        log::debug!("setting charge voltage for {} cells: {} mV", cells, max_charge_mv);

        let min_reg = ((min_sys_mv / 256) as u8) & 0b0011_1111;
        let max_reg = ((max_charge_mv / 8) << 3) & 0b0111_1111_1111_1000;
        self.write(delay, REG_MIN_SYSTEM_VOLTAGE, &[min_reg])?;
        self.write_u16(delay, REG_MAX_CHARGE_VOLTAGE, max_reg)
    }

    /// Sets the charge current limit, clamped to the hard ceiling.
    ///
    /// Returns the commanded value in mA.
    pub fn set_charge_current<D: DelayNs>(&self, delay: &mut D, ma: u32) -> Result<u32> {
        let ma = ma.min(MAX_CHARGE_CURRENT_MA);
        log::debug!("setting charge current to {} mA", ma);

        // 7-bit field at 64 mA per step.
        let steps = (ma / 64).min(128) as u16;
        self.write_u16(delay, REG_CHARGE_CURRENT, steps << 6)?;
        Ok(ma)
    }
}

/// Enables or disables high impedance mode on the regulator output.
///
/// The fan follows the output enable: no airflow is needed while the
/// output floats.
pub fn hi_z<P: RegulatorPins>(pins: &mut P, enable: bool) {
    pins.set_ilim_hiz(!enable);
    pins.set_fan(!enable);
}

/// Enables or disables OTG mode. Stays disabled during charging.
pub fn otg<P: RegulatorPins>(pins: &mut P, enable: bool) {
    pins.set_otg(enable);
}

/// Charge voltage setpoint per series cell count in mV.
const CHARGE_VOLTAGE_MV: [u16; 5] = [0, 4192, 8400, 12592, 16800];
/// Minimum system voltage per series cell count in mV, roughly 80 % of
/// nominal. Index 0 is the device reset default.
const MIN_SYSTEM_VOLTAGE_MV: [u16; 5] = [1024, 2816, 5632, 8448, 11264];

// Register definitions.
const REG_CHARGE_OPTION_0: u8 = 0x00;
const REG_CHARGE_CURRENT: u8 = 0x02;
const REG_MAX_CHARGE_VOLTAGE: u8 = 0x04;
const REG_MIN_SYSTEM_VOLTAGE: u8 = 0x0d;
const REG_CHARGE_STATUS: u8 = 0x20;
const REG_ADC_VBUS: u8 = 0x27;
const REG_ADC_ICHG: u8 = 0x2a;
const REG_ADC_IIN: u8 = 0x2b;
const REG_ADC_VBAT: u8 = 0x2c;
const REG_ADC_VSYS: u8 = 0x2d;
const REG_MANUFACTURER_ID: u8 = 0x2e;
const REG_DEVICE_ID: u8 = 0x2f;
const REG_ADC_OPTION: u8 = 0x3a;

/// Bus address of the regulator.
pub const I2C_ADDR: u8 = 0x6b;

/// BQ25703A chip ids.
const MANUFACTURER_ID: u8 = 0x40;
const DEVICE_ID: u8 = 0x78;

/// Fixed ChargeOption0 operating mode image.
const CHARGE_OPTION_0_LO: u8 = 0x0e;
const CHARGE_OPTION_0_HI: u8 = 0x26;

const ADC_ENABLE_MASK: u8 = 0xff;
const ADC_START_CONVERSION: u8 = 1 << 6;
const CHARGING_ACTIVE_MASK: u8 = 1 << 2;

/// NAK retry budget per transaction.
const NAK_RETRY_BUDGET_MS: u32 = 200;
/// Cooperative wait between ADC completion polls.
const ADC_POLL_MS: u32 = 80;
/// ADC completion polls before the harvest is abandoned.
const ADC_POLL_LIMIT: u32 = 25;
