// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core value types shared by every service.
//!
//! - [`Address`] - 48-bit device address, the key of all per-device state
//! - [`AttemptId`] - identifier of one connect attempt
//! - [`DeviceLinkState`] - logical state tracked by a connection controller
//! - [`LinkStatus`] - physical link status reported by the radio

mod address;
mod attempt_id;
mod link;

pub use address::Address;
pub use attempt_id::AttemptId;
pub use link::{CacheMode, DeviceLinkState, GattStatus, LinkStatus, ScanMode};
