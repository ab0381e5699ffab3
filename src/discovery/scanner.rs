// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::Result;
use crate::event::{AdvertisementReceived, DeviceUpserted, EventBus};
use crate::naming::{NameResolutionService, is_address_like};
use crate::radio::{Advertisement, BleDevice, Radio};
use crate::registry::{DeviceRegistry, RssiSample, SignalHistory};
use crate::supervisor::Supervisor;
use crate::types::{Address, ScanMode};

/// Turns advertisements and the paired-device list into registry records.
///
/// Every record without a usable name is handed to the
/// [`NameResolutionService`].
pub struct DiscoveryService<R: Radio> {
    radio: Arc<R>,
    registry: Arc<DeviceRegistry>,
    history: Arc<SignalHistory>,
    names: Arc<NameResolutionService<R>>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    supervisor: Supervisor,
    scope: Mutex<Option<Supervisor>>,
}

impl<R: Radio> DiscoveryService<R> {
    /// Creates a stopped service.
    pub fn new(
        radio: Arc<R>,
        registry: Arc<DeviceRegistry>,
        history: Arc<SignalHistory>,
        names: Arc<NameResolutionService<R>>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            radio,
            registry,
            history,
            names,
            bus,
            clock,
            supervisor,
            scope: Mutex::new(None),
        }
    }

    /// Starts scanning in `mode` and consumes advertisements in the
    /// background.
    ///
    /// Does nothing if a scan is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot start scanning.
    pub fn start(self: &Arc<Self>, mode: ScanMode) -> Result<()> {
        let mut slot = self.scope.lock();
        if slot.is_some() {
            tracing::debug!(?mode, "Scan already running");
            return Ok(());
        }

        let mut advertisements = self.radio.watch_advertisements(mode)?;
        let scope = self.supervisor.child();
        let this = Arc::clone(self);
        scope.spawn("advertisement-consumer", async move {
            while let Some(advertisement) = advertisements.recv().await {
                this.ingest(advertisement);
            }
            tracing::debug!("Advertisement stream closed");
        });
        *slot = Some(scope);
        tracing::info!(?mode, "Scan started");
        Ok(())
    }

    /// Stops scanning and waits for the consumer to finish.
    pub async fn stop(&self) {
        let scope = self.scope.lock().take();
        if let Some(scope) = scope {
            scope.shutdown().await;
            tracing::info!("Scan stopped");
        }
    }

    /// Returns `true` while a scan is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scope.lock().is_some()
    }

    /// Records one advertisement.
    ///
    /// The advertisement is republished as [`AdvertisementReceived`], its
    /// signal strength is appended to the [`SignalHistory`] and the registry
    /// record is created or refreshed. An address-like advertised name is
    /// treated as no name at all.
    pub fn ingest(&self, advertisement: Advertisement) {
        let address = advertisement.address;
        if address.is_zero() {
            return;
        }

        self.bus.publish(AdvertisementReceived {
            advertisement: advertisement.clone(),
        });
        self.history.append(
            address,
            RssiSample {
                timestamp: advertisement.timestamp,
                rssi: advertisement.rssi,
            },
        );

        let name = usable_name(&advertisement.name, address);
        let now = self.clock.now();
        let (device, is_new) = self.registry.upsert_with(address, now, |record| {
            if record.device_id.is_empty() {
                record.device_id = address.to_hex_string();
            }
            record.last_seen = now;
            record.last_rssi = Some(advertisement.rssi);
            if !name.is_empty() {
                record.name = name.to_string();
            }
            let manufacturer = advertisement.manufacturer.trim();
            if !manufacturer.is_empty() {
                record.manufacturer = manufacturer.to_string();
            }
            merge_uuids(&mut record.service_uuids, &advertisement.service_uuids);
        });

        if is_new {
            tracing::debug!(%address, rssi = advertisement.rssi, "New device");
        }
        if device.has_blank_name() {
            self.names.enqueue(address);
        }
        self.bus.publish(DeviceUpserted { device, is_new });
    }

    /// Adds every device paired with this host to the registry as a pinned
    /// record. Returns the number of paired devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot list paired devices.
    pub async fn refresh_paired(&self) -> Result<usize> {
        let devices = self.radio.paired_devices().await?;
        let count = devices.len();

        for handle in devices {
            let address = handle.address();
            if address.is_zero() {
                continue;
            }
            let os_name = handle.name();
            let name = usable_name(&os_name, address);
            let status = handle.connection_status();
            let now = self.clock.now();

            let (device, is_new) = self.registry.upsert_with(address, now, |record| {
                if record.device_id.is_empty() {
                    record.device_id = address.to_hex_string();
                }
                if !name.is_empty() {
                    record.name = name.to_string();
                }
                record.is_paired = true;
                record.pinned = true;
                record.link_status = status;
                record.last_seen = now;
            });

            if device.has_blank_name() {
                self.names.enqueue(address);
            }
            self.bus.publish(DeviceUpserted { device, is_new });
        }

        tracing::info!(count, "Paired devices refreshed");
        Ok(count)
    }
}

/// Returns the trimmed `name`, or `""` if it only repeats the address.
fn usable_name(name: &str, address: Address) -> &str {
    if is_address_like(name, address) {
        ""
    } else {
        name.trim()
    }
}

fn merge_uuids(stored: &mut Vec<uuid::Uuid>, advertised: &[uuid::Uuid]) {
    let mut seen: HashSet<uuid::Uuid> = stored.iter().copied().collect();
    for uuid in advertised {
        if seen.insert(*uuid) {
            stored.push(*uuid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_names_are_dropped() {
        let address = Address::new(0xAABB_CCDD_EEFF);
        assert_eq!(usable_name("AA:BB:CC:DD:EE:FF", address), "");
        assert_eq!(usable_name("  Thermo  ", address), "Thermo");
        assert_eq!(usable_name("", address), "");
    }

    #[test]
    fn uuid_merge_keeps_order_and_skips_duplicates() {
        let a = uuid::Uuid::from_u128(1);
        let b = uuid::Uuid::from_u128(2);
        let c = uuid::Uuid::from_u128(3);
        let mut stored = vec![a, b];
        merge_uuids(&mut stored, &[b, c, c]);
        assert_eq!(stored, vec![a, b, c]);
    }
}
