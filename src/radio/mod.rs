// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Radio abstraction.
//!
//! The crate never talks to a Bluetooth stack directly. A platform backend
//! implements [`Radio`] (the adapter) and [`BleDevice`] (one open device
//! handle); every service is generic over the backend.
//!
//! Dropping a device handle releases it. Services keep handles in `Arc`s and
//! drop them when they stop tracking a device.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::{Uuid, uuid};

use crate::error::Result;
use crate::types::{Address, CacheMode, GattStatus, LinkStatus, ScanMode};

/// Generic Access Profile service (0x1800).
pub const GAP_SERVICE_UUID: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device Name characteristic (0x2A00) of the GAP service.
pub const GAP_DEVICE_NAME_UUID: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// A Bluetooth adapter able to open device handles and scan.
pub trait Radio: Send + Sync + 'static {
    /// Device handle type produced by this radio.
    type Device: BleDevice;

    /// Opens a handle to the device at `address`.
    ///
    /// Returns `Ok(None)` if the device is not known to the radio.
    fn connect(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Option<Self::Device>>> + Send;

    /// Returns handles to every device paired with this host.
    fn paired_devices(&self) -> impl Future<Output = Result<Vec<Self::Device>>> + Send;

    /// Starts scanning and returns the stream of received advertisements.
    ///
    /// Scanning stops when the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter cannot start scanning.
    fn watch_advertisements(&self, mode: ScanMode) -> Result<mpsc::Receiver<Advertisement>>;

    /// Returns the stream of OS device-information notifications, if the
    /// platform provides one.
    fn watch_device_info(&self) -> Option<mpsc::Receiver<DeviceInfoUpdate>> {
        None
    }
}

/// An open handle to one device.
pub trait BleDevice: Send + Sync + 'static {
    /// Returns the device address.
    fn address(&self) -> Address;

    /// Returns the name cached by the operating system, possibly empty.
    fn name(&self) -> String;

    /// Returns `true` if the device is paired with this host.
    fn is_paired(&self) -> bool;

    /// Returns the current physical link status.
    fn connection_status(&self) -> LinkStatus;

    /// Subscribes to physical link status changes.
    fn status_changes(&self) -> broadcast::Receiver<LinkStatus>;

    /// Enumerates the device's primary GATT services.
    fn services(&self, cache_mode: CacheMode)
    -> impl Future<Output = GattServicesResult> + Send;

    /// Reads the GATT session parameters.
    fn session_info(&self) -> impl Future<Output = Result<GattSessionInfo>> + Send;

    /// Reads one characteristic value.
    fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        cache_mode: CacheMode,
    ) -> impl Future<Output = GattReadResult> + Send;
}

/// Result of a GATT service enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattServicesResult {
    /// Operation status.
    pub status: GattStatus,
    /// Service UUIDs, empty unless `status` is success.
    pub services: Vec<Uuid>,
}

impl GattServicesResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(services: Vec<Uuid>) -> Self {
        Self {
            status: GattStatus::Success,
            services,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(status: GattStatus) -> Self {
        Self {
            status,
            services: Vec::new(),
        }
    }
}

/// Result of a characteristic read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattReadResult {
    /// Operation status.
    pub status: GattStatus,
    /// Raw value, empty unless `status` is success.
    pub value: Vec<u8>,
}

impl GattReadResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(value: Vec<u8>) -> Self {
        Self {
            status: GattStatus::Success,
            value,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(status: GattStatus) -> Self {
        Self {
            status,
            value: Vec::new(),
        }
    }
}

/// GATT session parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattSessionInfo {
    /// Negotiated maximum PDU size.
    pub max_pdu: u16,
    /// Whether the platform keeps the link open.
    pub maintain_connection: bool,
    /// Platform session status text.
    pub session_status: String,
}

/// Advertising PDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AdvertisementKind {
    /// Connectable undirected.
    #[default]
    ConnectableUndirected,
    /// Connectable directed.
    ConnectableDirected,
    /// Scannable undirected.
    ScannableUndirected,
    /// Non-connectable undirected.
    NonConnectableUndirected,
    /// Scan response.
    ScanResponse,
    /// Extended advertisement.
    Extended,
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Advertiser address.
    pub address: Address,
    /// Advertised local name, possibly empty.
    pub name: String,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Reception time.
    pub timestamp: DateTime<Utc>,
    /// Manufacturer name, possibly empty.
    pub manufacturer: String,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Advertising PDU type.
    pub kind: AdvertisementKind,
}

impl Advertisement {
    /// Creates an anonymous advertisement.
    #[must_use]
    pub fn new(address: Address, rssi: i16, timestamp: DateTime<Utc>) -> Self {
        Self {
            address,
            name: String::new(),
            rssi,
            timestamp,
            manufacturer: String::new(),
            service_uuids: Vec::new(),
            kind: AdvertisementKind::default(),
        }
    }

    /// Sets the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the manufacturer.
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    /// Sets the advertised service UUIDs.
    #[must_use]
    pub fn with_service_uuids(mut self, uuids: Vec<Uuid>) -> Self {
        self.service_uuids = uuids;
        self
    }
}

/// OS notification that a device was added or its information changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfoUpdate {
    /// Device address.
    pub address: Address,
    /// Name reported by the operating system.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_uuids_are_sig_base_uuids() {
        assert_eq!(
            GAP_SERVICE_UUID.to_string(),
            "00001800-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            GAP_DEVICE_NAME_UUID.to_string(),
            "00002a00-0000-1000-8000-00805f9b34fb"
        );
    }
}
