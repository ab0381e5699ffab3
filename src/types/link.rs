// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link, cache and GATT status enumerations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical link state tracked by a connection controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceLinkState {
    /// No link and no attempt in flight.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is up.
    Connected,
    /// A disconnect is in progress.
    Disconnecting,
    /// The last connect attempt failed. Treated like `Disconnected` for retries.
    Failed,
}

impl DeviceLinkState {
    /// Returns `true` while a connect or disconnect is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Returns `true` if the link is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for DeviceLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Physical link status as reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkStatus {
    /// The radio reports no link.
    #[default]
    Disconnected,
    /// The radio reports an established link.
    Connected,
}

impl LinkStatus {
    /// Returns `true` for [`LinkStatus::Connected`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Whether a GATT query may be answered from a cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheMode {
    /// A previously cached result is acceptable.
    Cached,
    /// The query must reach the device.
    Uncached,
}

/// Outcome of a GATT operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GattStatus {
    /// The operation succeeded.
    Success,
    /// The device did not answer.
    Unreachable,
    /// The device refused access.
    AccessDenied,
    /// The device answered with a protocol error.
    ProtocolError,
    /// Any other failure.
    Unknown,
}

impl GattStatus {
    /// Returns `true` for [`GattStatus::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Unreachable => "unreachable",
            Self::AccessDenied => "access denied",
            Self::ProtocolError => "protocol error",
            Self::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// Advertisement scanning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanMode {
    /// Request scan responses from advertisers.
    #[default]
    Active,
    /// Listen only.
    Passive,
}
