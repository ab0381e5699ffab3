// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection orchestration.
//!
//! - [`ConnectionService`] - gated connect attempts and tracked sessions
//! - [`DeviceConnectionController`] - state machine for one address
//! - [`ConnectionOrchestratorRegistry`] - creates controllers on demand
//!
//! # Attempt ordering
//!
//! Each connect attempt carries an [`AttemptId`](crate::AttemptId) and a
//! cancellation token. A later connect or disconnect request cancels the
//! token; a completing attempt whose token was cancelled, or whose id is no
//! longer current, leaves the controller untouched. Snapshots are published
//! outside the controller's lock and carry a per-address `sequence`, so
//! subscribers can always tell which one is newest.

mod config;
mod controller;
mod orchestrator;
mod service;
mod snapshot;

pub use config::{ConnectConfig, ReconnectPolicy};
pub use controller::DeviceConnectionController;
pub use orchestrator::ConnectionOrchestratorRegistry;
pub use service::ConnectionService;
pub use snapshot::DeviceConnectionSnapshot;
