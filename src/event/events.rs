// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Events published on the [`EventBus`](super::EventBus).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection::DeviceConnectionSnapshot;
use crate::heartbeat::DeviceHeartbeatSnapshot;
use crate::radio::Advertisement;
use crate::registry::DeviceRecord;
use crate::types::{Address, LinkStatus};

/// The radio reported a physical link change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatusChanged {
    /// Device address.
    pub address: Address,
    /// New status.
    pub status: LinkStatus,
    /// When the change was observed.
    pub timestamp: DateTime<Utc>,
}

/// A connection controller changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStateChanged {
    /// The controller's new state.
    pub snapshot: DeviceConnectionSnapshot,
}

/// A heartbeat monitor changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatStateChanged {
    /// The monitor's new state.
    pub snapshot: DeviceHeartbeatSnapshot,
}

/// A device record was inserted or updated in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceUpserted {
    /// The stored record.
    pub device: DeviceRecord,
    /// `true` if the record did not exist before.
    pub is_new: bool,
}

/// An advertisement was received while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertisementReceived {
    /// The advertisement.
    pub advertisement: Advertisement,
}
