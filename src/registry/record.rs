// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device and signal sample records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Address, LinkStatus};

/// Everything known about one discovered device.
///
/// `number` is assigned by the [`DeviceRegistry`](super::DeviceRegistry) on
/// first insert and never changes afterwards; the same holds for
/// `first_seen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device address.
    pub address: Address,
    /// Platform-specific device identifier, empty if unknown.
    pub device_id: String,
    /// Best known name, empty if unknown.
    pub name: String,
    /// Whether the device is paired with this host.
    pub is_paired: bool,
    /// When the device was first seen.
    pub first_seen: DateTime<Utc>,
    /// When the device was last seen.
    pub last_seen: DateTime<Utc>,
    /// Last received signal strength in dBm.
    pub last_rssi: Option<i16>,
    /// Pinned records are never aged out.
    pub pinned: bool,
    /// Physical link status.
    pub link_status: LinkStatus,
    /// Stable display number, 1-based, assigned on first insert.
    pub number: u64,
    /// Manufacturer name, empty if unknown.
    pub manufacturer: String,
    /// Advertised GATT service UUIDs.
    pub service_uuids: Vec<Uuid>,
}

impl DeviceRecord {
    /// Creates an unnamed, unpinned, disconnected record first seen at `now`.
    #[must_use]
    pub fn new(address: Address, now: DateTime<Utc>) -> Self {
        Self {
            address,
            device_id: String::new(),
            name: String::new(),
            is_paired: false,
            first_seen: now,
            last_seen: now,
            last_rssi: None,
            pinned: false,
            link_status: LinkStatus::Disconnected,
            number: 0,
            manufacturer: String::new(),
            service_uuids: Vec::new(),
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the pinned flag.
    #[must_use]
    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    /// Sets the link status.
    #[must_use]
    pub fn with_link_status(mut self, status: LinkStatus) -> Self {
        self.link_status = status;
        self
    }

    /// Returns `true` if the record has no usable name.
    #[must_use]
    pub fn has_blank_name(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// One received signal strength sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssiSample {
    /// When the sample was received.
    pub timestamp: DateTime<Utc>,
    /// Signal strength in dBm.
    pub rssi: i16,
}
