// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `blelink` library.
//!
//! Failures are grouped into a small taxonomy that background loops encode
//! into the `last_error` field of the snapshots they publish. Each variant
//! maps to a stable error code via [`Error::code`].

use thiserror::Error;

use crate::types::GattStatus;

/// Error code for a device that could not be found or did not answer.
pub const ERROR_CODE_UNREACHABLE: &str = "error.unreachable";

/// Error code for an operation that exceeded its time budget.
pub const ERROR_CODE_TIMEOUT: &str = "error.timeout";

/// Error code for a caller-initiated cancellation.
pub const ERROR_CODE_CANCELED: &str = "error.canceled";

/// Error code for a GATT protocol error reported by the radio.
pub const ERROR_CODE_PROTOCOL: &str = "error.protocol";

/// Error code for a GATT access-denied status reported by the radio.
pub const ERROR_CODE_ACCESS_DENIED: &str = "error.access_denied";

/// The main error type for this library.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The device was not found or a liveness probe failed.
    #[error("device unreachable")]
    Unreachable,

    /// The operation exceeded its time budget.
    #[error("operation timed out")]
    Timeout,

    /// The caller cancelled the operation. This is not a failure.
    #[error("operation canceled")]
    Canceled,

    /// The radio reported a non-success GATT status.
    #[error("GATT operation failed: {0}")]
    Gatt(GattStatus),

    /// The radio backend failed with a message of its own.
    #[error("radio error: {0}")]
    Radio(String),

    /// A string could not be parsed as a device address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl Error {
    /// Returns the stable error code recorded in snapshots.
    ///
    /// Radio and parse failures carry their own message, which is used as-is.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Unreachable => ERROR_CODE_UNREACHABLE.to_string(),
            Self::Timeout => ERROR_CODE_TIMEOUT.to_string(),
            Self::Canceled => ERROR_CODE_CANCELED.to_string(),
            Self::Gatt(GattStatus::AccessDenied) => ERROR_CODE_ACCESS_DENIED.to_string(),
            Self::Gatt(GattStatus::ProtocolError) => ERROR_CODE_PROTOCOL.to_string(),
            Self::Gatt(_) => ERROR_CODE_UNREACHABLE.to_string(),
            Self::Radio(message) | Self::InvalidAddress(message) => message.clone(),
        }
    }

    /// Returns `true` if this error represents a caller-initiated cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
