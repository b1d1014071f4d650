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

//! Serialized shared bus access.

use core::{
    cell::{RefCell, RefMut},
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use embedded_hal::delay::DelayNs;

/// Maximum wait for the bus lease before a transaction is skipped.
pub const BUS_LEASE_TIMEOUT_MS: u32 = 300;

/// The bus lease could not be acquired within [`BUS_LEASE_TIMEOUT_MS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LeaseTimeout;

/// Serial bus shared between bus users under a single process-wide lease.
///
/// Tasks are cooperative and never yield mid-transaction, so contention
/// only arises when a leaseholder misbehaves; the bounded wait turns that
/// into a soft failure instead of a deadlock.
#[derive(Debug, Default)]
pub struct SharedBus<I2C> {
    bus: RefCell<I2C>,
    taken: AtomicBool,
}

impl<I2C> SharedBus<I2C> {
    /// Wraps a bus for shared access.
    pub const fn new(bus: I2C) -> Self {
        Self { bus: RefCell::new(bus), taken: AtomicBool::new(false) }
    }

    /// Acquires the bus lease, waiting cooperatively up to
    /// [`BUS_LEASE_TIMEOUT_MS`].
    ///
    /// The lease is released when the returned guard drops.
    pub fn lease<'a, D: DelayNs>(&'a self, delay: &mut D) -> Result<BusLease<'a, I2C>, LeaseTimeout> {
        let mut waited_ms = 0;
        while self.taken.swap(true, Ordering::Acquire) {
            if waited_ms >= BUS_LEASE_TIMEOUT_MS {
                log::warn!("bus lease wait timed out");
                return Err(LeaseTimeout);
            }
            delay.delay_ms(1);
            waited_ms += 1;
        }
        Ok(BusLease { bus: self.bus.borrow_mut(), taken: &self.taken })
    }
}

/// Exclusive use of the shared bus. Dereferences to the bus itself.
pub struct BusLease<'a, I2C> {
    bus: RefMut<'a, I2C>,
    taken: &'a AtomicBool,
}

impl<I2C> Drop for BusLease<'_, I2C> {
    fn drop(&mut self) {
        self.taken.store(false, Ordering::Release);
    }
}

impl<I2C> Deref for BusLease<'_, I2C> {
    type Target = I2C;

    fn deref(&self) -> &I2C {
        &self.bus
    }
}

impl<I2C> DerefMut for BusLease<'_, I2C> {
    fn deref_mut(&mut self) -> &mut I2C {
        &mut self.bus
    }
}
