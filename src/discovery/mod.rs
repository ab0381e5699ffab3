// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device discovery and expiry.
//!
//! [`DiscoveryService`] feeds the [`DeviceRegistry`](crate::registry::DeviceRegistry)
//! from two sources:
//!
//! - advertisements received while scanning
//! - the list of devices paired with the host, which are pinned
//!
//! [`DeviceAgingService`] removes records that have not been seen for a
//! while, unless they are pinned or connected.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use blelink::radio::Radio;
//! use blelink::types::ScanMode;
//! use blelink::{Host, HostConfig, SystemClock};
//!
//! # async fn example<R: Radio>(radio: R) -> blelink::Result<()> {
//! let host = Host::new(Arc::new(radio), Arc::new(SystemClock), HostConfig::default());
//! host.start();
//! host.discovery().refresh_paired().await?;
//! host.start_capture(ScanMode::Active)?;
//!
//! for device in host.registry().all() {
//!     println!("#{} {} {}", device.number, device.address, device.name);
//! }
//!
//! host.stop().await;
//! # Ok(())
//! # }
//! ```

mod aging;
mod scanner;

pub use aging::{AgingConfig, DeviceAgingService};
pub use scanner::DiscoveryService;
