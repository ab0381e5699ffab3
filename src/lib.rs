// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `blelink` - connection orchestration for fleets of Bluetooth Low Energy
//! peripherals.
//!
//! The crate keeps many BLE devices connected at once on top of any radio
//! backend implementing [`radio::Radio`]. It owns no platform code.
//!
//! # Features
//!
//! - **Connection control**: one state machine per device, at most one
//!   connect attempt in flight, stale results discarded
//! - **Auto-reconnect**: jittered exponential backoff, hold-off after manual
//!   disconnects
//! - **Heartbeat**: periodic GATT session probes with failure accounting
//! - **Name resolution**: OS cache then GAP Device Name, with escalating
//!   retries
//! - **Discovery**: advertisement ingestion, paired-device import, record
//!   aging and RSSI history
//! - **Message log**: bounded per-device record of GATT traffic and failed
//!   operations, queryable by address and kind
//! - **Events**: every state change is published on a typed [`EventBus`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use blelink::event::ConnectionStateChanged;
//! use blelink::radio::Radio;
//! use blelink::{Address, Host, HostConfig, SystemClock};
//!
//! # async fn example<R: Radio>(radio: R) -> blelink::Result<()> {
//! let host = Host::new(Arc::new(radio), Arc::new(SystemClock), HostConfig::default());
//! host.start();
//!
//! let _subscription = host.bus().subscribe(|event: &ConnectionStateChanged| {
//!     println!("{} is {}", event.snapshot.address, event.snapshot.state);
//! });
//!
//! let address: Address = "AA:BB:CC:DD:EE:FF".parse()?;
//! host.orchestrator().set_auto_reconnect_enabled(address, true);
//! host.heartbeat().set_enabled(address, true);
//!
//! // ...
//!
//! host.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Ordering
//!
//! Every [`DeviceConnectionSnapshot`] carries a per-device `sequence` that
//! grows by one on each state change. Events are published outside of any
//! lock, so subscribers on different threads may see them out of order and
//! should keep the highest sequence.

pub mod backoff;
pub mod clock;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod event;
pub mod heartbeat;
mod host;
pub mod naming;
pub mod radio;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use connection::{
    ConnectConfig, ConnectionOrchestratorRegistry, ConnectionService, DeviceConnectionController,
    DeviceConnectionSnapshot, ReconnectPolicy,
};
pub use discovery::{AgingConfig, DeviceAgingService, DiscoveryService};
pub use error::{Error, Result};
pub use event::{EventBus, Subscription, SubscriptionId};
pub use heartbeat::{
    DeviceHeartbeatSnapshot, HeartbeatConfig, HeartbeatProbeResult, HeartbeatService,
};
pub use host::{Host, HostConfig};
pub use naming::{NameResolutionConfig, NameResolutionService};
pub use registry::{DeviceRecord, DeviceRegistry, MessageLog, MessageQuery, SignalHistory};
pub use supervisor::Supervisor;
pub use types::{Address, AttemptId, CacheMode, DeviceLinkState, GattStatus, LinkStatus, ScanMode};
