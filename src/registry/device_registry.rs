// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Concurrent map of discovered devices.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::DeviceRecord;
use crate::types::{Address, LinkStatus};

/// Registry of every device the host knows about, keyed by address.
///
/// All methods take `&self`; the map is guarded by a `parking_lot::RwLock`
/// that is never held across an await. Reads return clones.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<Address, DeviceRecord>,
    next_number: u64,
}

impl Inner {
    /// Inserts or replaces `record`, keeping the stored `number` and
    /// `first_seen`. Returns `true` if the record is new.
    fn upsert(&mut self, mut record: DeviceRecord) -> (DeviceRecord, bool) {
        let is_new = match self.devices.get(&record.address) {
            Some(existing) => {
                record.number = existing.number;
                record.first_seen = existing.first_seen;
                false
            }
            None => {
                self.next_number += 1;
                record.number = self.next_number;
                true
            }
        };
        self.devices.insert(record.address, record.clone());
        (record, is_new)
    }
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    ///
    /// A new record receives the next display number. A replaced record keeps
    /// the number and `first_seen` of the stored one. Returns the stored record
    /// and whether it was new.
    pub fn upsert(&self, record: DeviceRecord) -> (DeviceRecord, bool) {
        self.inner.write().upsert(record)
    }

    /// Applies `update` to the stored record, creating a fresh one first if
    /// the address is unknown.
    ///
    /// Returns the stored record and whether it was new.
    pub fn upsert_with<F>(
        &self,
        address: Address,
        now: DateTime<Utc>,
        update: F,
    ) -> (DeviceRecord, bool)
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut inner = self.inner.write();
        let mut record = inner
            .devices
            .get(&address)
            .cloned()
            .unwrap_or_else(|| DeviceRecord::new(address, now));
        update(&mut record);
        record.address = address;
        inner.upsert(record)
    }

    /// Applies `update` to the stored record if the address is known.
    pub fn update<F>(&self, address: Address, update: F) -> Option<DeviceRecord>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut inner = self.inner.write();
        let record = inner.devices.get_mut(&address)?;
        update(record);
        Some(record.clone())
    }

    /// Returns the record for `address`.
    #[must_use]
    pub fn get(&self, address: Address) -> Option<DeviceRecord> {
        self.inner.read().devices.get(&address).cloned()
    }

    /// Returns `true` if `address` is known.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        self.inner.read().devices.contains_key(&address)
    }

    /// Returns every record, ordered by display number.
    #[must_use]
    pub fn all(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> =
            self.inner.read().devices.values().cloned().collect();
        records.sort_by_key(|record| record.number);
        records
    }

    /// Returns the number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().devices.len()
    }

    /// Returns `true` if no device is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().devices.is_empty()
    }

    /// Removes and returns the record for `address`.
    pub fn remove(&self, address: Address) -> Option<DeviceRecord> {
        self.inner.write().devices.remove(&address)
    }

    /// Sets the pinned flag of a known device. Returns `false` if unknown.
    pub fn set_pinned(&self, address: Address, pinned: bool) -> bool {
        self.update(address, |record| record.pinned = pinned)
            .is_some()
    }

    /// Records a physical link status change for a known device and refreshes
    /// its `last_seen`.
    ///
    /// Unknown addresses are left alone and `None` is returned.
    pub fn set_link_status(
        &self,
        address: Address,
        status: LinkStatus,
        now: DateTime<Utc>,
    ) -> Option<DeviceRecord> {
        self.update(address, |record| {
            record.link_status = status;
            record.last_seen = now;
        })
    }

    /// Returns the link status of `address`, `Disconnected` if unknown.
    #[must_use]
    pub fn link_status(&self, address: Address) -> LinkStatus {
        self.inner
            .read()
            .devices
            .get(&address)
            .map(|record| record.link_status)
            .unwrap_or_default()
    }

    /// Removes every record matching `predicate`, returning the removed ones.
    pub fn remove_where<F>(&self, mut predicate: F) -> Vec<DeviceRecord>
    where
        F: FnMut(&DeviceRecord) -> bool,
    {
        let mut inner = self.inner.write();
        let doomed: Vec<Address> = inner
            .devices
            .values()
            .filter(|record| predicate(record))
            .map(|record| record.address)
            .collect();
        doomed
            .into_iter()
            .filter_map(|address| inner.devices.remove(&address))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn numbers_are_assigned_once() {
        let registry = DeviceRegistry::new();
        let a = Address::new(0xA);
        let b = Address::new(0xB);

        let (first, is_new) = registry.upsert(DeviceRecord::new(a, t0()));
        assert!(is_new);
        assert_eq!(first.number, 1);

        let (second, _) = registry.upsert(DeviceRecord::new(b, t0()));
        assert_eq!(second.number, 2);

        let later = clock::add(t0(), Duration::from_secs(10));
        let (again, is_new) = registry.upsert(DeviceRecord::new(a, later).with_name("Lamp"));
        assert!(!is_new);
        assert_eq!(again.number, 1);
        assert_eq!(again.first_seen, t0());
        assert_eq!(again.name, "Lamp");
    }

    #[test]
    fn all_is_ordered_by_number() {
        let registry = DeviceRegistry::new();
        for value in [5_u64, 3, 9] {
            registry.upsert(DeviceRecord::new(Address::new(value), t0()));
        }

        let numbers: Vec<u64> = registry.all().iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn link_status_ignores_unknown_devices() {
        let registry = DeviceRegistry::new();
        let address = Address::new(0x1234);

        assert!(
            registry
                .set_link_status(address, LinkStatus::Connected, t0())
                .is_none()
        );
        assert!(registry.is_empty());

        registry.upsert(DeviceRecord::new(address, t0()));
        let later = clock::add(t0(), Duration::from_secs(1));
        let updated = registry
            .set_link_status(address, LinkStatus::Connected, later)
            .unwrap();
        assert_eq!(updated.link_status, LinkStatus::Connected);
        assert_eq!(updated.last_seen, later);
        assert_eq!(registry.link_status(address), LinkStatus::Connected);
    }

    #[test]
    fn upsert_with_creates_missing_records() {
        let registry = DeviceRegistry::new();
        let address = Address::new(0x42);

        let (record, is_new) = registry.upsert_with(address, t0(), |r| r.name = "Tag".into());
        assert!(is_new);
        assert_eq!(record.name, "Tag");

        let (record, is_new) = registry.upsert_with(address, t0(), |r| r.pinned = true);
        assert!(!is_new);
        assert!(record.pinned);
        assert_eq!(record.name, "Tag");
    }

    #[test]
    fn remove_where_returns_removed_records() {
        let registry = DeviceRegistry::new();
        registry.upsert(DeviceRecord::new(Address::new(1), t0()).with_pinned(true));
        registry.upsert(DeviceRecord::new(Address::new(2), t0()));

        let removed = registry.remove_where(|r| !r.pinned);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].address, Address::new(2));
        assert_eq!(registry.len(), 1);
    }
}
