// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory device state.
//!
//! - [`DeviceRegistry`] - address to [`DeviceRecord`] map shared by every service
//! - [`SignalHistory`] - bounded RSSI history per device
//! - [`MessageLog`] - bounded log of GATT traffic and operation errors per device

mod device_registry;
mod message_log;
mod record;
mod signal_history;

pub use device_registry::DeviceRegistry;
pub use message_log::{
    DEFAULT_MESSAGE_RETENTION, MessageDirection, MessageKind, MessageLog, MessageQuery,
    MessageRecord,
};
pub use record::{DeviceRecord, RssiSample};
pub use signal_history::{DEFAULT_RETENTION, SignalHistory};
