// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded per-device RSSI history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::RssiSample;
use crate::types::Address;

/// Default number of samples kept per device.
pub const DEFAULT_RETENTION: usize = 1024;

/// Signal strength samples per device, oldest evicted first.
#[derive(Debug)]
pub struct SignalHistory {
    samples: Mutex<HashMap<Address, VecDeque<RssiSample>>>,
    retention: AtomicUsize,
}

impl SignalHistory {
    /// Creates an empty history keeping [`DEFAULT_RETENTION`] samples per
    /// device.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Creates an empty history keeping `retention` samples per device
    /// (at least one).
    #[must_use]
    pub fn with_retention(retention: usize) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            retention: AtomicUsize::new(retention.max(1)),
        }
    }

    /// Appends a sample, evicting the oldest ones beyond the retention.
    pub fn append(&self, address: Address, sample: RssiSample) {
        let retention = self.retention();
        let mut samples = self.samples.lock();
        let list = samples.entry(address).or_default();
        list.push_back(sample);
        while list.len() > retention {
            list.pop_front();
        }
    }

    /// Returns up to `max` of the most recent samples, oldest first.
    ///
    /// At least one sample is returned when any exist.
    #[must_use]
    pub fn latest(&self, address: Address, max: usize) -> Vec<RssiSample> {
        let samples = self.samples.lock();
        let Some(list) = samples.get(&address) else {
            return Vec::new();
        };
        let skip = list.len().saturating_sub(max.max(1));
        list.iter().skip(skip).copied().collect()
    }

    /// Drops every sample for `address`.
    pub fn clear(&self, address: Address) {
        self.samples.lock().remove(&address);
    }

    /// Changes the per-device retention (at least one).
    ///
    /// Existing histories are trimmed on their next append.
    pub fn set_retention(&self, retention: usize) {
        self.retention.store(retention.max(1), Ordering::Relaxed);
    }

    /// Returns the per-device retention.
    #[must_use]
    pub fn retention(&self) -> usize {
        self.retention.load(Ordering::Relaxed)
    }
}

impl Default for SignalHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn sample(rssi: i16) -> RssiSample {
        RssiSample {
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            rssi,
        }
    }

    #[test]
    fn oldest_samples_are_evicted() {
        let history = SignalHistory::with_retention(3);
        let address = Address::new(1);
        for rssi in [-40, -41, -42, -43, -44] {
            history.append(address, sample(rssi));
        }

        let rssi: Vec<i16> = history.latest(address, 10).iter().map(|s| s.rssi).collect();
        assert_eq!(rssi, vec![-42, -43, -44]);
    }

    #[test]
    fn latest_returns_tail() {
        let history = SignalHistory::new();
        let address = Address::new(2);
        for rssi in [-50, -51, -52] {
            history.append(address, sample(rssi));
        }

        let rssi: Vec<i16> = history.latest(address, 2).iter().map(|s| s.rssi).collect();
        assert_eq!(rssi, vec![-51, -52]);
        assert_eq!(history.latest(address, 0).len(), 1);
        assert!(history.latest(Address::new(3), 5).is_empty());
    }

    #[test]
    fn clear_and_retention() {
        let history = SignalHistory::new();
        let address = Address::new(4);
        history.append(address, sample(-60));
        history.clear(address);
        assert!(history.latest(address, 5).is_empty());

        history.set_retention(0);
        assert_eq!(history.retention(), 1);
    }
}
