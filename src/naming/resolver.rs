// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background device name resolution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::is_plausible_name;
use crate::backoff;
use crate::clock::{self, Clock};
use crate::event::{DeviceUpserted, EventBus};
use crate::radio::{BleDevice, GAP_DEVICE_NAME_UUID, GAP_SERVICE_UUID, Radio};
use crate::error::ERROR_CODE_UNREACHABLE;
use crate::registry::{DeviceRegistry, MessageKind, MessageLog, MessageRecord};
use crate::supervisor::Supervisor;
use crate::types::{Address, CacheMode};

/// Name resolution tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameResolutionConfig {
    /// Resolutions allowed to run at once.
    pub max_concurrency: usize,
    /// Interval of the background loop.
    pub tick_interval: Duration,
    /// Pending addresses drained per tick.
    pub batch_size: usize,
    /// Retry delay after the first failure.
    pub retry_initial_delay: Duration,
    /// Largest retry delay.
    pub retry_max_delay: Duration,
    /// Per-attempt timeout of the first attempt.
    pub timeout_initial: Duration,
    /// Largest per-attempt timeout.
    pub timeout_max: Duration,
    /// Growth factor of the per-attempt timeout.
    pub timeout_multiplier: f64,
    /// Smallest retry jitter factor.
    pub jitter_min: f64,
    /// Largest retry jitter factor.
    pub jitter_max: f64,
}

impl NameResolutionConfig {
    /// Sets the concurrency limit (at least one).
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Sets the loop interval.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

impl Default for NameResolutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            tick_interval: Duration::from_secs(5),
            batch_size: 64,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            timeout_initial: Duration::from_secs(2),
            timeout_max: Duration::from_secs(10),
            timeout_multiplier: 1.5,
            jitter_min: 0.85,
            jitter_max: 1.2,
        }
    }
}

/// Retry schedule of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    /// Failed attempts so far.
    pub attempt_index: u32,
    /// Delay applied after the next failure.
    pub current_delay: Duration,
    /// Timeout of the next attempt.
    pub current_timeout: Duration,
    /// When the address is due for another attempt.
    pub next_planned: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PendingQueue {
    order: VecDeque<Address>,
    queued: HashSet<Address>,
}

/// Resolves human-readable device names in the background.
///
/// Addresses are queued with [`enqueue`](Self::enqueue) and resolved by a
/// background loop, at most [`max_concurrency`](NameResolutionConfig) at a
/// time. A resolution first asks the operating system for its cached name,
/// then reads the GAP Device Name characteristic. Only one GAP read runs at a
/// time. Failed addresses are retried with growing delays and timeouts.
///
/// A resolved name is written to the [`DeviceRegistry`] only if the stored
/// name is blank or address-like, and announced as [`DeviceUpserted`].
/// GAP reads, resolved names and failures are recorded in the
/// [`MessageLog`].
pub struct NameResolutionService<R: Radio> {
    radio: Arc<R>,
    registry: Arc<DeviceRegistry>,
    messages: Arc<MessageLog>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    supervisor: Supervisor,
    config: NameResolutionConfig,
    pending: Mutex<PendingQueue>,
    retries: Mutex<HashMap<Address, RetryInfo>>,
    concurrency: Semaphore,
    gap_gate: Semaphore,
    wake: Notify,
    scope: Mutex<Option<Supervisor>>,
}

impl<R: Radio> NameResolutionService<R> {
    /// Creates a stopped service.
    pub fn new(
        radio: Arc<R>,
        registry: Arc<DeviceRegistry>,
        messages: Arc<MessageLog>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        supervisor: Supervisor,
        config: NameResolutionConfig,
    ) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            radio,
            registry,
            messages,
            bus,
            clock,
            supervisor,
            config,
            pending: Mutex::new(PendingQueue::default()),
            retries: Mutex::new(HashMap::new()),
            concurrency: Semaphore::new(permits),
            gap_gate: Semaphore::new(1),
            wake: Notify::new(),
            scope: Mutex::new(None),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the background loop and the OS device-info listener.
    ///
    /// Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let scope = {
            let mut slot = self.scope.lock();
            if slot.is_some() {
                return;
            }
            let scope = self.supervisor.child();
            *slot = Some(scope.clone());
            scope
        };

        let this = Arc::clone(self);
        scope.spawn("name-resolution-loop", async move { this.run().await });

        if let Some(mut updates) = self.radio.watch_device_info() {
            let this = Arc::clone(self);
            scope.spawn("device-info-listener", async move {
                while let Some(update) = updates.recv().await {
                    if update.address.is_zero() {
                        continue;
                    }
                    tracing::trace!(address = %update.address, "Device info update");
                    this.commit_name(update.address, &update.name);
                }
            });
        }
        tracing::info!("Name resolution started");
    }

    /// Stops the background loop and waits for it to finish.
    pub async fn stop(&self) {
        let scope = self.scope.lock().take();
        if let Some(scope) = scope {
            scope.shutdown().await;
            tracing::info!("Name resolution stopped");
        }
    }

    /// Returns `true` while the background loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scope.lock().is_some()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Queues `address` for resolution and resets its retry schedule.
    ///
    /// The zero address is ignored. Queuing an address that is already
    /// pending only resets its schedule.
    pub fn enqueue(&self, address: Address) {
        if address.is_zero() {
            return;
        }
        self.reset_retry(address);

        let added = {
            let mut pending = self.pending.lock();
            if pending.queued.insert(address) {
                pending.order.push_back(address);
                true
            } else {
                false
            }
        };
        if added {
            tracing::trace!(%address, "Name resolution queued");
            self.wake.notify_one();
        }
    }

    /// Resolves `address` right away, bypassing the queue.
    ///
    /// Returns `true` if a name was found.
    pub async fn fetch_now(&self, address: Address) -> bool {
        self.resolve(address).await
    }

    /// Returns the number of queued addresses.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().order.len()
    }

    /// Returns the retry schedule of `address`, if it has one.
    #[must_use]
    pub fn retry_info(&self, address: Address) -> Option<RetryInfo> {
        self.retries.lock().get(&address).cloned()
    }

    // =========================================================================
    // Background loop
    // =========================================================================

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.wake.notified() => {}
            }
            Arc::clone(&self).drain_pending().await;
            self.schedule_due_retries();
        }
    }

    async fn drain_pending(self: Arc<Self>) {
        let batch: Vec<Address> = {
            let mut pending = self.pending.lock();
            let take = pending.order.len().min(self.config.batch_size);
            let batch: Vec<Address> = pending.order.drain(..take).collect();
            for address in &batch {
                pending.queued.remove(address);
            }
            batch
        };
        if batch.is_empty() {
            return;
        }

        tracing::debug!(count = batch.len(), "Resolving names");
        let mut tasks = JoinSet::new();
        for address in batch {
            let this = Arc::clone(&self);
            tasks.spawn(async move { this.resolve(address).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Name resolution task failed");
            }
        }
    }

    fn schedule_due_retries(&self) {
        let now = self.clock.now();
        let due: Vec<Address> = self
            .retries
            .lock()
            .iter()
            .filter(|(_, info)| info.next_planned <= now)
            .map(|(address, _)| *address)
            .collect();
        if due.is_empty() {
            return;
        }

        let mut pending = self.pending.lock();
        for address in due {
            if pending.queued.insert(address) {
                pending.order.push_back(address);
            }
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    async fn resolve(&self, address: Address) -> bool {
        let Ok(_permit) = self.concurrency.acquire().await else {
            return false;
        };

        let timeout = self.retry_timeout(address);
        if let Ok(true) = tokio::time::timeout(timeout, self.resolve_os_name(address)).await {
            return true;
        }

        let gap = tokio::time::timeout(timeout, async {
            let _gate = self.gap_gate.acquire().await.ok()?;
            Some(self.resolve_gap_name(address).await)
        })
        .await;
        if let Ok(Some(true)) = gap {
            return true;
        }

        self.messages.append(MessageRecord::error(
            address,
            ERROR_CODE_UNREACHABLE,
            self.clock.now(),
        ));
        self.mark_failure(address);
        false
    }

    async fn resolve_os_name(&self, address: Address) -> bool {
        let device = match self.radio.connect(address).await {
            Ok(Some(device)) => device,
            Ok(None) => return false,
            Err(e) => {
                tracing::debug!(%address, error = %e, "Cannot open device for name");
                return false;
            }
        };
        let name = device.name();
        if !is_plausible_name(&name, address) {
            return false;
        }
        self.messages.append(
            MessageRecord::traffic(address, MessageKind::ReadIn, self.clock.now())
                .with_text(format!("OS name {name}")),
        );
        self.commit_name(address, &name);
        true
    }

    async fn resolve_gap_name(&self, address: Address) -> bool {
        let device = match self.radio.connect(address).await {
            Ok(Some(device)) => device,
            Ok(None) => return false,
            Err(e) => {
                tracing::debug!(%address, error = %e, "Cannot open device for GAP read");
                return false;
            }
        };
        self.messages.append(
            MessageRecord::traffic(address, MessageKind::ReadOut, self.clock.now())
                .with_characteristic(GAP_SERVICE_UUID, GAP_DEVICE_NAME_UUID),
        );
        let read = device
            .read_characteristic(GAP_SERVICE_UUID, GAP_DEVICE_NAME_UUID, CacheMode::Uncached)
            .await;
        if !read.status.is_success() || read.value.is_empty() {
            tracing::trace!(%address, status = %read.status, "GAP name unavailable");
            return false;
        }
        self.messages.append(
            MessageRecord::traffic(address, MessageKind::ReadIn, self.clock.now())
                .with_characteristic(GAP_SERVICE_UUID, GAP_DEVICE_NAME_UUID)
                .with_data(read.value.clone()),
        );

        let decoded = String::from_utf8_lossy(&read.value);
        let name = decoded.trim_end_matches('\0');
        if !is_plausible_name(name, address) {
            return false;
        }
        self.commit_name(address, name);
        true
    }

    /// Stores `name` unless the registry already has a plausible one, and
    /// ends the address's retry schedule.
    fn commit_name(&self, address: Address, name: &str) {
        let name = name.trim();
        if !is_plausible_name(name, address) {
            return;
        }

        let now = self.clock.now();
        let mut changed = false;
        let (device, is_new) = self.registry.upsert_with(address, now, |record| {
            if !is_plausible_name(&record.name, address) {
                record.name = name.to_string();
                record.last_seen = now;
                if record.device_id.is_empty() {
                    record.device_id = address.to_hex_string();
                }
                changed = true;
            }
        });
        self.retries.lock().remove(&address);

        if changed {
            tracing::info!(%address, name, "Name resolved");
            self.bus.publish(DeviceUpserted { device, is_new });
        }
    }

    // =========================================================================
    // Retry schedule
    // =========================================================================

    fn fresh_retry(&self) -> RetryInfo {
        RetryInfo {
            attempt_index: 0,
            current_delay: self.config.retry_initial_delay,
            current_timeout: self.config.timeout_initial,
            next_planned: self.clock.now(),
        }
    }

    fn reset_retry(&self, address: Address) {
        let info = self.fresh_retry();
        self.retries.lock().insert(address, info);
    }

    fn retry_timeout(&self, address: Address) -> Duration {
        let fresh = self.fresh_retry();
        self.retries
            .lock()
            .entry(address)
            .or_insert(fresh)
            .current_timeout
    }

    fn mark_failure(&self, address: Address) {
        let fresh = self.fresh_retry();
        let now = self.clock.now();
        let mut retries = self.retries.lock();
        let info = retries.entry(address).or_insert(fresh);

        info.attempt_index += 1;
        info.current_delay = backoff::scale(info.current_delay, 2.0).min(self.config.retry_max_delay);
        info.current_timeout = backoff::scale(info.current_timeout, self.config.timeout_multiplier)
            .min(self.config.timeout_max);
        let jitter = backoff::factor(self.config.jitter_min, self.config.jitter_max);
        let delay = backoff::scale(info.current_delay, jitter).max(Duration::from_millis(1));
        info.next_planned = clock::add(now, delay);

        tracing::debug!(
            %address,
            attempt = info.attempt_index,
            delay_ms = delay.as_millis(),
            timeout_ms = info.current_timeout.as_millis(),
            "Name resolution failed, retry scheduled"
        );
    }
}
