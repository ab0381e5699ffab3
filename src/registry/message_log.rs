// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded per-device log of GATT traffic and operation errors.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Address;

/// Default number of messages kept per device.
pub const DEFAULT_MESSAGE_RETENTION: usize = 1000;

/// Default number of messages returned by a query.
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Whether a message went to the device or came from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

/// What a logged message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// GATT service enumeration request.
    ServiceQueryOut,
    /// GATT service enumeration answer.
    ServiceQueryIn,
    /// Characteristic read request.
    ReadOut,
    /// Characteristic read answer.
    ReadIn,
    /// A failed operation, with its error code as text.
    OperationError,
}

impl MessageKind {
    /// Returns the direction messages of this kind travel in.
    #[must_use]
    pub fn direction(self) -> MessageDirection {
        match self {
            Self::ServiceQueryOut | Self::ReadOut => MessageDirection::Out,
            Self::ServiceQueryIn | Self::ReadIn | Self::OperationError => MessageDirection::In,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ServiceQueryOut => "service-query-out",
            Self::ServiceQueryIn => "service-query-in",
            Self::ReadOut => "read-out",
            Self::ReadIn => "read-in",
            Self::OperationError => "operation-error",
        };
        f.write_str(name)
    }
}

/// One logged message.
///
/// `id` is assigned by [`MessageLog::append`] and increases across all
/// devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Log-wide identifier, zero until appended.
    pub id: u64,
    /// When the message was sent or received.
    pub timestamp: DateTime<Utc>,
    /// Device address.
    pub address: Address,
    /// Direction of the message.
    pub direction: MessageDirection,
    /// Kind of message.
    pub kind: MessageKind,
    /// GATT service involved, if any.
    pub service: Option<Uuid>,
    /// GATT characteristic involved, if any.
    pub characteristic: Option<Uuid>,
    /// Raw payload.
    pub data: Vec<u8>,
    /// Human-readable summary.
    pub text: String,
}

impl MessageRecord {
    /// Creates an empty message.
    #[must_use]
    pub fn new(
        address: Address,
        direction: MessageDirection,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            timestamp,
            address,
            direction,
            kind,
            service: None,
            characteristic: None,
            data: Vec::new(),
            text: String::new(),
        }
    }

    /// Creates a message of `kind` travelling in its usual direction.
    #[must_use]
    pub fn traffic(address: Address, kind: MessageKind, timestamp: DateTime<Utc>) -> Self {
        Self::new(address, kind.direction(), kind, timestamp)
    }

    /// Creates an [`MessageKind::OperationError`] message carrying `code`.
    #[must_use]
    pub fn error(address: Address, code: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::traffic(address, MessageKind::OperationError, timestamp).with_text(code)
    }

    /// Sets the GATT service and characteristic.
    #[must_use]
    pub fn with_characteristic(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.service = Some(service);
        self.characteristic = Some(characteristic);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Sets the summary text.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

/// Filter for [`MessageLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    /// Device whose messages are returned.
    pub address: Address,
    /// Only this direction.
    pub direction: Option<MessageDirection>,
    /// Only these kinds; empty matches all.
    pub kinds: Vec<MessageKind>,
    /// Only this service.
    pub service: Option<Uuid>,
    /// Only this characteristic.
    pub characteristic: Option<Uuid>,
    /// Only messages at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Largest number of messages returned (at least one).
    pub limit: usize,
}

impl MessageQuery {
    /// Matches every message of `address`.
    #[must_use]
    pub fn for_address(address: Address) -> Self {
        Self {
            address,
            direction: None,
            kinds: Vec::new(),
            service: None,
            characteristic: None,
            since: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Restricts the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: MessageDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Restricts the kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = MessageKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Restricts the characteristic.
    #[must_use]
    pub fn with_characteristic(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.service = Some(service);
        self.characteristic = Some(characteristic);
        self
    }

    /// Drops messages older than `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, record: &MessageRecord) -> bool {
        self.direction.is_none_or(|d| d == record.direction)
            && (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && self.service.is_none_or(|s| record.service == Some(s))
            && self
                .characteristic
                .is_none_or(|c| record.characteristic == Some(c))
            && self.since.is_none_or(|since| record.timestamp >= since)
    }
}

/// Messages per device, oldest evicted first.
#[derive(Debug)]
pub struct MessageLog {
    messages: Mutex<HashMap<Address, VecDeque<MessageRecord>>>,
    retention: AtomicUsize,
    next_id: AtomicU64,
}

impl MessageLog {
    /// Creates an empty log keeping [`DEFAULT_MESSAGE_RETENTION`] messages
    /// per device.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MESSAGE_RETENTION)
    }

    /// Creates an empty log keeping `retention` messages per device (at
    /// least one).
    #[must_use]
    pub fn with_retention(retention: usize) -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            retention: AtomicUsize::new(retention.max(1)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `record` under its address and returns the assigned id.
    pub fn append(&self, mut record: MessageRecord) -> u64 {
        let retention = self.retention();
        let mut messages = self.messages.lock();
        record.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = record.id;
        let list = messages.entry(record.address).or_default();
        list.push_back(record);
        while list.len() > retention {
            list.pop_front();
        }
        id
    }

    /// Returns the matching messages of `query.address`, newest first.
    #[must_use]
    pub fn query(&self, query: &MessageQuery) -> Vec<MessageRecord> {
        let messages = self.messages.lock();
        let Some(list) = messages.get(&query.address) else {
            return Vec::new();
        };
        let mut matching: Vec<MessageRecord> = list
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        matching.truncate(query.limit.max(1));
        matching
    }

    /// Returns the message of `address` with `id`, if still retained.
    #[must_use]
    pub fn get(&self, address: Address, id: u64) -> Option<MessageRecord> {
        self.messages
            .lock()
            .get(&address)?
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Drops every message of `address`.
    pub fn clear(&self, address: Address) {
        self.messages.lock().remove(&address);
    }

    /// Changes the per-device retention (at least one).
    ///
    /// Existing logs are trimmed on their next append.
    pub fn set_retention(&self, retention: usize) {
        self.retention.store(retention.max(1), Ordering::Relaxed);
    }

    /// Returns the per-device retention.
    #[must_use]
    pub fn retention(&self) -> usize {
        self.retention.load(Ordering::Relaxed)
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}
