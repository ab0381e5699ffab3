// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scriptable in-memory radio shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use blelink::error::{Error, Result};
use blelink::radio::{
    Advertisement, BleDevice, DeviceInfoUpdate, GattReadResult, GattServicesResult,
    GattSessionInfo, Radio,
};
use blelink::{
    Address, CacheMode, GattStatus, Host, HostConfig, LinkStatus, MonotonicClock, ScanMode,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Fixed wall-clock origin of every test.
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

// ============================================================================
// In-flight counter
// ============================================================================

/// Counts calls that are currently running and remembers the most seen at once.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    /// Marks one call as running until the guard drops.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Device
// ============================================================================

struct DeviceShared {
    address: Address,
    os_name: Mutex<String>,
    gap_name: Mutex<Option<String>>,
    paired: bool,
    reachable: AtomicBool,
    status: Mutex<LinkStatus>,
    status_tx: broadcast::Sender<LinkStatus>,
    session_delay: Mutex<Duration>,
    session_probes: AtomicUsize,
    gap_reads: AtomicUsize,
    gap_in_flight: Mutex<Arc<InFlight>>,
}

/// Fake device handle. Clones share state.
#[derive(Clone)]
pub struct FakeDevice(Arc<DeviceShared>);

impl FakeDevice {
    pub fn new(address: Address) -> Self {
        Self::build(address, false)
    }

    pub fn paired(address: Address) -> Self {
        Self::build(address, true)
    }

    fn build(address: Address, paired: bool) -> Self {
        let (status_tx, _) = broadcast::channel(16);
        Self(Arc::new(DeviceShared {
            address,
            os_name: Mutex::new(String::new()),
            gap_name: Mutex::new(None),
            paired,
            reachable: AtomicBool::new(true),
            status: Mutex::new(LinkStatus::Disconnected),
            status_tx,
            session_delay: Mutex::new(Duration::from_millis(20)),
            session_probes: AtomicUsize::new(0),
            gap_reads: AtomicUsize::new(0),
            gap_in_flight: Mutex::new(Arc::default()),
        }))
    }

    pub fn with_os_name(self, name: &str) -> Self {
        *self.0.os_name.lock() = name.to_string();
        self
    }

    pub fn with_gap_name(self, name: &str) -> Self {
        *self.0.gap_name.lock() = Some(name.to_string());
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.0.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_session_delay(&self, delay: Duration) {
        *self.0.session_delay.lock() = delay;
    }

    /// Simulates the radio reporting a physical link change.
    pub fn emit_status(&self, status: LinkStatus) {
        *self.0.status.lock() = status;
        let _ = self.0.status_tx.send(status);
    }

    pub fn session_probes(&self) -> usize {
        self.0.session_probes.load(Ordering::SeqCst)
    }

    pub fn gap_reads(&self) -> usize {
        self.0.gap_reads.load(Ordering::SeqCst)
    }

    fn reachable(&self) -> bool {
        self.0.reachable.load(Ordering::SeqCst)
    }
}

impl BleDevice for FakeDevice {
    fn address(&self) -> Address {
        self.0.address
    }

    fn name(&self) -> String {
        self.0.os_name.lock().clone()
    }

    fn is_paired(&self) -> bool {
        self.0.paired
    }

    fn connection_status(&self) -> LinkStatus {
        *self.0.status.lock()
    }

    fn status_changes(&self) -> broadcast::Receiver<LinkStatus> {
        self.0.status_tx.subscribe()
    }

    fn services(&self, _cache_mode: CacheMode) -> impl Future<Output = GattServicesResult> + Send {
        let device = self.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if device.reachable() {
                *device.0.status.lock() = LinkStatus::Connected;
                GattServicesResult::success(vec![Uuid::from_u128(0x1800)])
            } else {
                GattServicesResult::failure(GattStatus::Unreachable)
            }
        }
    }

    fn session_info(&self) -> impl Future<Output = Result<GattSessionInfo>> + Send {
        let device = self.clone();
        let delay = *self.0.session_delay.lock();
        async move {
            device.0.session_probes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            if device.reachable() {
                Ok(GattSessionInfo {
                    max_pdu: 247,
                    maintain_connection: true,
                    session_status: "Active".to_string(),
                })
            } else {
                Err(Error::Unreachable)
            }
        }
    }

    fn read_characteristic(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        _cache_mode: CacheMode,
    ) -> impl Future<Output = GattReadResult> + Send {
        let device = self.clone();
        let in_flight = self.0.gap_in_flight.lock().clone();
        async move {
            let _guard = in_flight.enter();
            device.0.gap_reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let name = device.0.gap_name.lock().clone();
            match name {
                Some(name) if device.reachable() => GattReadResult::success(name.into_bytes()),
                _ => GattReadResult::failure(GattStatus::Unreachable),
            }
        }
    }
}

// ============================================================================
// Radio
// ============================================================================

/// Fake adapter holding a set of known devices.
#[derive(Default)]
pub struct FakeRadio {
    devices: Mutex<HashMap<Address, FakeDevice>>,
    connect_calls: Mutex<HashMap<Address, usize>>,
    connect_delay: Mutex<Duration>,
    advertisements: Mutex<Option<mpsc::Sender<Advertisement>>>,
    device_info: Mutex<Option<mpsc::Receiver<DeviceInfoUpdate>>>,
    connects_in_flight: Arc<InFlight>,
    gap_reads_in_flight: Arc<InFlight>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            connect_delay: Mutex::new(Duration::from_millis(50)),
            ..Self::default()
        }
    }

    pub fn add(&self, device: FakeDevice) -> FakeDevice {
        *device.0.gap_in_flight.lock() = Arc::clone(&self.gap_reads_in_flight);
        self.devices.lock().insert(device.address(), device.clone());
        device
    }

    pub fn device(&self, address: Address) -> Option<FakeDevice> {
        self.devices.lock().get(&address).cloned()
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn connect_calls(&self, address: Address) -> usize {
        self.connect_calls.lock().get(&address).copied().unwrap_or(0)
    }

    /// Most `connect` calls seen running at once, across all addresses.
    pub fn connect_peak(&self) -> usize {
        self.connects_in_flight.peak()
    }

    /// Most GAP name reads seen running at once, across all devices.
    pub fn gap_read_peak(&self) -> usize {
        self.gap_reads_in_flight.peak()
    }

    /// Installs a device-info stream returned by the next `watch_device_info`.
    pub fn device_info_stream(&self) -> mpsc::Sender<DeviceInfoUpdate> {
        let (tx, rx) = mpsc::channel(16);
        *self.device_info.lock() = Some(rx);
        tx
    }

    /// Delivers an advertisement to the running scan.
    pub async fn advertise(&self, advertisement: Advertisement) {
        let sender = self.advertisements.lock().clone();
        if let Some(sender) = sender {
            sender.send(advertisement).await.unwrap();
        }
    }
}

impl Radio for FakeRadio {
    type Device = FakeDevice;

    fn connect(&self, address: Address) -> impl Future<Output = Result<Option<FakeDevice>>> + Send {
        *self.connect_calls.lock().entry(address).or_default() += 1;
        let delay = *self.connect_delay.lock();
        let device = self.device(address);
        let in_flight = Arc::clone(&self.connects_in_flight);
        async move {
            let _guard = in_flight.enter();
            tokio::time::sleep(delay).await;
            Ok(device)
        }
    }

    fn paired_devices(&self) -> impl Future<Output = Result<Vec<FakeDevice>>> + Send {
        let mut paired: Vec<FakeDevice> = self
            .devices
            .lock()
            .values()
            .filter(|device| device.is_paired())
            .cloned()
            .collect();
        paired.sort_by_key(BleDevice::address);
        async move { Ok(paired) }
    }

    fn watch_advertisements(&self, _mode: ScanMode) -> Result<mpsc::Receiver<Advertisement>> {
        let (tx, rx) = mpsc::channel(64);
        *self.advertisements.lock() = Some(tx);
        Ok(rx)
    }

    fn watch_device_info(&self) -> Option<mpsc::Receiver<DeviceInfoUpdate>> {
        self.device_info.lock().take()
    }
}

// ============================================================================
// Host
// ============================================================================

/// Builds a host over `radio` with a clock following tokio's virtual time.
pub fn host(radio: &Arc<FakeRadio>, config: HostConfig) -> Host<FakeRadio> {
    Host::new(
        Arc::clone(radio),
        Arc::new(MonotonicClock::anchored_at(t0())),
        config,
    )
}

/// Lets background tasks run for `duration` of virtual time.
pub async fn run_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}
