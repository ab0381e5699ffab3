// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Point-in-time copy of a heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHeartbeatSnapshot {
    /// Device address.
    pub address: Address,
    /// Whether periodic probing is enabled.
    pub enabled: bool,
    /// `true` while a probe is running.
    pub is_probing: bool,
    /// Completion time of the last successful probe.
    pub last_success: Option<DateTime<Utc>>,
    /// Start time of the last probe.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Completion time of the last failed probe.
    pub last_failure: Option<DateTime<Utc>>,
    /// Round-trip time of the last successful probe, zero after a failure.
    pub last_latency_ms: u64,
    /// Failed probes since the last success.
    pub consecutive_failures: u32,
    /// Error code of the last failed probe, cleared on success.
    pub last_error_code: Option<String>,
    /// When the next scheduled probe is due.
    pub next_planned_probe: Option<DateTime<Utc>>,
    /// Probe period.
    pub period: Duration,
}

/// Outcome of one heartbeat probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatProbeResult {
    /// Device address.
    pub address: Address,
    /// Whether the device answered.
    pub succeeded: bool,
    /// Round-trip time, zero on failure.
    pub latency_ms: u64,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Error code on failure.
    pub error: Option<String>,
}
