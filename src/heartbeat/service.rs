// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic liveness probing of connected devices.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use super::{DeviceHeartbeatSnapshot, HeartbeatProbeResult};
use crate::clock::{self, Clock};
use crate::connection::ConnectionService;
use crate::error::{ERROR_CODE_TIMEOUT, ERROR_CODE_UNREACHABLE};
use crate::event::{EventBus, HeartbeatStateChanged, LinkStatusChanged, Subscription};
use crate::radio::Radio;
use crate::registry::{DeviceRegistry, MessageLog, MessageRecord};
use crate::supervisor::Supervisor;
use crate::types::{Address, LinkStatus};

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Probe period of a new monitor.
    pub default_period: Duration,
    /// Shortest allowed period.
    pub min_period: Duration,
    /// Interval at which monitors check whether a probe is due.
    pub tick_interval: Duration,
    /// Time budget of one probe.
    pub probe_timeout: Duration,
}

impl HeartbeatConfig {
    /// Sets the default probe period.
    #[must_use]
    pub fn with_default_period(mut self, period: Duration) -> Self {
        self.default_period = period;
        self
    }

    /// Sets the probe time budget.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            default_period: Duration::from_secs(10),
            min_period: Duration::from_secs(1),
            tick_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
struct Monitor {
    enabled: bool,
    probing: bool,
    last_success: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_latency_ms: u64,
    consecutive_failures: u32,
    last_error_code: Option<String>,
    next_planned_probe: Option<DateTime<Utc>>,
    period: Duration,
    loop_running: bool,
}

impl Monitor {
    fn new(period: Duration) -> Self {
        Self {
            enabled: false,
            probing: false,
            last_success: None,
            last_attempt: None,
            last_failure: None,
            last_latency_ms: 0,
            consecutive_failures: 0,
            last_error_code: None,
            next_planned_probe: None,
            period,
            loop_running: false,
        }
    }

    fn snapshot(&self, address: Address) -> DeviceHeartbeatSnapshot {
        DeviceHeartbeatSnapshot {
            address,
            enabled: self.enabled,
            is_probing: self.probing,
            last_success: self.last_success,
            last_attempt: self.last_attempt,
            last_failure: self.last_failure,
            last_latency_ms: self.last_latency_ms,
            consecutive_failures: self.consecutive_failures,
            last_error_code: self.last_error_code.clone(),
            next_planned_probe: self.next_planned_probe,
            period: self.period,
        }
    }

    /// Marks a probe as started at `now` and schedules the next one.
    fn begin_probe(&mut self, now: DateTime<Utc>) {
        self.probing = true;
        self.last_attempt = Some(now);
        self.next_planned_probe = Some(clock::add(now, self.period));
    }

    /// Starts a probe unless one is already running. Returns `true` if the
    /// caller now owns the probe.
    fn try_begin_probe(&mut self, now: DateTime<Utc>) -> bool {
        if self.probing {
            return false;
        }
        self.begin_probe(now);
        true
    }

    fn record(&mut self, result: &HeartbeatProbeResult) {
        self.probing = false;
        if result.succeeded {
            self.last_success = Some(result.timestamp);
            self.last_latency_ms = result.latency_ms;
            self.last_error_code = None;
            self.consecutive_failures = 0;
        } else {
            self.last_failure = Some(result.timestamp);
            self.last_latency_ms = 0;
            self.last_error_code.clone_from(&result.error);
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }
}

/// Probes connected devices periodically to confirm they still answer.
///
/// Each address gets a monitor on first use. An enabled monitor probes its
/// device every `period` while the registry reports it connected. Failures
/// are counted, reported in [`HeartbeatStateChanged`] snapshots and
/// recorded in the [`MessageLog`]; they never stop probing and never change
/// the link state.
pub struct HeartbeatService<R: Radio> {
    service: Arc<ConnectionService<R>>,
    registry: Arc<DeviceRegistry>,
    messages: Arc<MessageLog>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    supervisor: Supervisor,
    config: HeartbeatConfig,
    monitors: Mutex<HashMap<Address, Monitor>>,
    scope: Mutex<Supervisor>,
    link_subscription: Mutex<Option<Subscription>>,
    this: Weak<Self>,
}

impl<R: Radio> HeartbeatService<R> {
    /// Creates a service with no monitors.
    pub fn new(
        service: Arc<ConnectionService<R>>,
        registry: Arc<DeviceRegistry>,
        messages: Arc<MessageLog>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        supervisor: Supervisor,
        config: HeartbeatConfig,
    ) -> Arc<Self> {
        let scope = supervisor.child();
        Arc::new_cyclic(|this| Self {
            service,
            registry,
            messages,
            bus,
            clock,
            supervisor,
            config,
            monitors: Mutex::new(HashMap::new()),
            scope: Mutex::new(scope),
            link_subscription: Mutex::new(None),
            this: this.clone(),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts probing devices as soon as their link comes up.
    pub fn start(&self) {
        let this = self.this.clone();
        let subscription = self.bus.subscribe(move |event: &LinkStatusChanged| {
            if event.status != LinkStatus::Connected {
                return;
            }
            if let Some(service) = this.upgrade() {
                service.on_link_connected(event.address);
            }
        });
        *self.link_subscription.lock() = Some(subscription);
        tracing::info!("Heartbeat started");
    }

    /// Stops listening for link changes and cancels every monitor loop and
    /// running probe.
    pub async fn stop(&self) {
        self.link_subscription.lock().take();

        let old_scope = std::mem::replace(&mut *self.scope.lock(), self.supervisor.child());
        for monitor in self.monitors.lock().values_mut() {
            monitor.loop_running = false;
            monitor.probing = false;
        }
        old_scope.shutdown().await;
        tracing::info!("Heartbeat stopped");
    }

    // =========================================================================
    // Monitor settings
    // =========================================================================

    /// Enables or disables periodic probing of `address`.
    ///
    /// Enabling schedules the first periodic probe one period ahead and, if
    /// the device is connected and idle, probes it right away.
    pub fn set_enabled(&self, address: Address, enabled: bool) {
        let connected = self.registry.link_status(address).is_connected();
        let now = self.clock.now();
        let (snapshot, probe_started) = {
            let mut monitors = self.monitors.lock();
            let monitor = self.monitor_entry(&mut monitors, address);
            let was_enabled = monitor.enabled;
            monitor.enabled = enabled;
            let mut probe_started = false;
            if enabled && !was_enabled {
                monitor.next_planned_probe = Some(clock::add(now, monitor.period));
                probe_started = connected && monitor.try_begin_probe(now);
            }
            (monitor.snapshot(address), probe_started)
        };
        tracing::debug!(%address, enabled, "Heartbeat toggled");
        self.publish(snapshot);
        self.ensure_loop(address);

        if probe_started {
            self.spawn_probe(address);
        }
    }

    /// Returns `true` if periodic probing of `address` is enabled.
    #[must_use]
    pub fn is_enabled(&self, address: Address) -> bool {
        self.monitors
            .lock()
            .get(&address)
            .is_some_and(|monitor| monitor.enabled)
    }

    /// Sets the probe period of `address`, at least one second, and schedules
    /// the next probe one period from now.
    pub fn set_period(&self, address: Address, period: Duration) {
        let period = period.max(self.config.min_period);
        let now = self.clock.now();
        let snapshot = {
            let mut monitors = self.monitors.lock();
            let monitor = self.monitor_entry(&mut monitors, address);
            monitor.period = period;
            monitor.next_planned_probe = Some(clock::add(now, period));
            monitor.snapshot(address)
        };
        tracing::debug!(%address, period_ms = period.as_millis(), "Heartbeat period changed");
        self.publish(snapshot);
        self.ensure_loop(address);
    }

    /// Returns the probe period of `address`.
    #[must_use]
    pub fn period(&self, address: Address) -> Duration {
        let mut monitors = self.monitors.lock();
        self.monitor_entry(&mut monitors, address).period
    }

    /// Returns the monitor state of `address`.
    #[must_use]
    pub fn snapshot(&self, address: Address) -> DeviceHeartbeatSnapshot {
        let mut monitors = self.monitors.lock();
        self.monitor_entry(&mut monitors, address).snapshot(address)
    }

    // =========================================================================
    // Probing
    // =========================================================================

    /// Probes `address` now, regardless of schedule or enabled state.
    pub async fn probe_now(&self, address: Address) -> HeartbeatProbeResult {
        let now = self.clock.now();
        let snapshot = {
            let mut monitors = self.monitors.lock();
            let monitor = self.monitor_entry(&mut monitors, address);
            monitor.begin_probe(now);
            monitor.snapshot(address)
        };
        self.publish(snapshot);

        let (result, snapshot) = self.probe(address).await;
        self.publish(snapshot);
        result
    }

    async fn probe(&self, address: Address) -> (HeartbeatProbeResult, DeviceHeartbeatSnapshot) {
        let cancel = self.scope.lock().child_token();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.probe_timeout,
            self.service.probe_session(address, &cancel),
        )
        .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let error = match outcome {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some(ERROR_CODE_UNREACHABLE.to_string()),
            Ok(Err(e)) => Some(e.code()),
            Err(_) => Some(ERROR_CODE_TIMEOUT.to_string()),
        };
        let result = HeartbeatProbeResult {
            address,
            succeeded: error.is_none(),
            latency_ms: if error.is_none() { elapsed_ms } else { 0 },
            timestamp: self.clock.now(),
            error,
        };

        match &result.error {
            None => tracing::trace!(%address, latency_ms = result.latency_ms, "Heartbeat ok"),
            Some(code) => {
                tracing::warn!(%address, error = %code, "Heartbeat probe failed");
                self.messages
                    .append(MessageRecord::error(address, code.as_str(), result.timestamp));
            }
        }

        let snapshot = {
            let mut monitors = self.monitors.lock();
            let monitor = self.monitor_entry(&mut monitors, address);
            monitor.record(&result);
            monitor.snapshot(address)
        };
        (result, snapshot)
    }

    /// Runs a probe already marked as started and publishes its outcome.
    fn spawn_probe(&self, address: Address) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.scope.lock().spawn("heartbeat-probe", async move {
            let (_, snapshot) = this.probe(address).await;
            this.publish(snapshot);
        });
    }

    fn on_link_connected(&self, address: Address) {
        let now = self.clock.now();
        let snapshot = {
            let mut monitors = self.monitors.lock();
            let Some(monitor) = monitors.get_mut(&address) else {
                return;
            };
            if !monitor.enabled || !monitor.try_begin_probe(now) {
                return;
            }
            monitor.snapshot(address)
        };
        tracing::debug!(%address, "Link up, probing now");
        self.publish(snapshot);
        self.spawn_probe(address);
    }

    // =========================================================================
    // Monitor loop
    // =========================================================================

    fn ensure_loop(&self, address: Address) {
        {
            let mut monitors = self.monitors.lock();
            let monitor = self.monitor_entry(&mut monitors, address);
            if monitor.loop_running {
                return;
            }
            monitor.loop_running = true;
        }

        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.scope.lock().spawn("heartbeat-monitor", async move {
            this.monitor_loop(address).await;
        });
    }

    async fn monitor_loop(self: Arc<Self>, address: Address) {
        let tick = self.config.tick_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let connected = self.registry.link_status(address).is_connected();
            let now = self.clock.now();
            let snapshot = {
                let mut monitors = self.monitors.lock();
                let Some(monitor) = monitors.get_mut(&address) else {
                    continue;
                };
                let due = monitor.next_planned_probe.is_none_or(|next| now >= next);
                if !monitor.enabled || !connected || !due || !monitor.try_begin_probe(now) {
                    continue;
                }
                monitor.snapshot(address)
            };
            self.publish(snapshot);
            self.spawn_probe(address);
        }
    }

    fn monitor_entry<'a>(
        &self,
        monitors: &'a mut HashMap<Address, Monitor>,
        address: Address,
    ) -> &'a mut Monitor {
        monitors
            .entry(address)
            .or_insert_with(|| Monitor::new(self.config.default_period))
    }

    fn publish(&self, snapshot: DeviceHeartbeatSnapshot) {
        self.bus.publish(HeartbeatStateChanged { snapshot });
    }
}
