// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system shared by every service.
//!
//! The [`EventBus`] dispatches by event type: a subscriber registers a handler
//! for one type and receives every value of that type published afterwards.
//! The crate publishes the event types defined in this module; applications
//! may publish their own types on the same bus.
//!
//! # Examples
//!
//! ```
//! use blelink::event::{EventBus, LinkStatusChanged};
//! use blelink::{Address, LinkStatus};
//!
//! let bus = EventBus::new();
//!
//! let _subscription = bus.subscribe(|event: &LinkStatusChanged| {
//!     println!("{} is now {:?}", event.address, event.status);
//! });
//!
//! bus.publish(LinkStatusChanged {
//!     address: Address::new(0xAABB_CCDD_EEFF),
//!     status: LinkStatus::Connected,
//!     timestamp: chrono::Utc::now(),
//! });
//! ```

mod event_bus;
mod events;

pub use event_bus::{EventBus, Subscription, SubscriptionId};
pub use events::{
    AdvertisementReceived, ConnectionStateChanged, DeviceUpserted, HeartbeatStateChanged,
    LinkStatusChanged,
};
