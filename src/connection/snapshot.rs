// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Address, AttemptId, DeviceLinkState};

/// Point-in-time copy of a connection controller's state.
///
/// Published as [`ConnectionStateChanged`](crate::event::ConnectionStateChanged)
/// after every transition. `sequence` strictly increases per address, so
/// subscribers can order snapshots even if deliveries interleave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnectionSnapshot {
    /// Device address.
    pub address: Address,
    /// Logical link state.
    pub state: DeviceLinkState,
    /// Current attempt, nil before the first one.
    pub attempt_id: AttemptId,
    /// Per-address publish counter.
    pub sequence: u64,
    /// `true` while connecting or disconnecting.
    pub busy: bool,
    /// Whether background reconnection is enabled.
    pub auto_reconnect_enabled: bool,
    /// When the current link came up.
    pub connected_since: Option<DateTime<Utc>>,
    /// When the reconnect worker plans its next attempt.
    pub next_reconnect: Option<DateTime<Utc>>,
    /// Error code of the last failed attempt.
    pub last_error: Option<String>,
}

impl DeviceConnectionSnapshot {
    /// Returns the snapshot of a controller that has done nothing yet.
    #[must_use]
    pub fn initial(address: Address) -> Self {
        Self {
            address,
            state: DeviceLinkState::Disconnected,
            attempt_id: AttemptId::nil(),
            sequence: 0,
            busy: false,
            auto_reconnect_enabled: false,
            connected_since: None,
            next_reconnect: None,
            last_error: None,
        }
    }
}
