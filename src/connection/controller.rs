// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device connection state machine.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{ConnectionService, DeviceConnectionSnapshot, ReconnectPolicy};
use crate::clock::{self, Clock};
use crate::error::ERROR_CODE_UNREACHABLE;
use crate::event::{ConnectionStateChanged, EventBus, LinkStatusChanged, Subscription};
use crate::radio::Radio;
use crate::supervisor::Supervisor;
use crate::types::{Address, AttemptId, CacheMode, DeviceLinkState, LinkStatus};

/// Mutable state of one controller. Only touched under the controller's lock.
#[derive(Debug, Default)]
struct ControllerState {
    link: DeviceLinkState,
    attempt_id: AttemptId,
    sequence: u64,
    auto_reconnect: bool,
    connected_since: Option<DateTime<Utc>>,
    next_reconnect: Option<DateTime<Utc>>,
    /// End of the hold-off that follows a manual disconnect.
    hold_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
    attempt_token: Option<CancellationToken>,
    worker_active: bool,
}

impl ControllerState {
    fn snapshot(&self, address: Address) -> DeviceConnectionSnapshot {
        DeviceConnectionSnapshot {
            address,
            state: self.link,
            attempt_id: self.attempt_id,
            sequence: self.sequence,
            busy: self.link.is_busy(),
            auto_reconnect_enabled: self.auto_reconnect,
            connected_since: self.connected_since,
            next_reconnect: self.next_reconnect,
            last_error: self.last_error.clone(),
        }
    }

    /// Bumps the sequence and returns the snapshot to publish.
    fn commit(&mut self, address: Address) -> DeviceConnectionSnapshot {
        self.sequence += 1;
        self.snapshot(address)
    }

    /// Schedules the next retry `delay` after `now`, or at the end of a
    /// pending manual-disconnect hold if that is later.
    fn schedule_retry(&mut self, now: DateTime<Utc>, delay: Duration) {
        let candidate = clock::add(now, delay);
        self.next_reconnect = match self.hold_until {
            Some(hold) if hold > candidate => Some(hold),
            _ => Some(candidate),
        };
    }
}

/// Connection state machine for one device address.
///
/// The controller serializes connect and disconnect requests for its address,
/// discards results of superseded attempts and, while auto-reconnect is
/// enabled, runs a background worker that keeps retrying with jittered
/// exponential backoff. Every transition publishes a
/// [`ConnectionStateChanged`] with a strictly increasing `sequence`.
///
/// Controllers are created by the
/// [`ConnectionOrchestratorRegistry`](super::ConnectionOrchestratorRegistry)
/// and live as long as it does.
pub struct DeviceConnectionController<R: Radio> {
    address: Address,
    service: Arc<ConnectionService<R>>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    supervisor: Supervisor,
    policy: ReconnectPolicy,
    state: Mutex<ControllerState>,
    this: Weak<Self>,
    _link_subscription: Subscription,
}

impl<R: Radio> DeviceConnectionController<R> {
    /// Creates a disconnected controller listening for link status changes of
    /// `address`.
    pub fn new(
        address: Address,
        service: Arc<ConnectionService<R>>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        supervisor: Supervisor,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let listener = this.clone();
            let link_subscription = bus.subscribe(move |event: &LinkStatusChanged| {
                if event.address != address {
                    return;
                }
                if let Some(controller) = listener.upgrade() {
                    controller.on_link_status(event.status);
                }
            });

            Self {
                address,
                service,
                bus,
                clock,
                supervisor,
                policy,
                state: Mutex::new(ControllerState::default()),
                this: this.clone(),
                _link_subscription: link_subscription,
            }
        })
    }

    /// Returns the device address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the current state.
    #[must_use]
    pub fn snapshot(&self) -> DeviceConnectionSnapshot {
        self.state.lock().snapshot(self.address)
    }

    /// Returns `true` while the reconnect worker is running.
    #[must_use]
    pub fn is_reconnect_worker_active(&self) -> bool {
        self.state.lock().worker_active
    }

    /// Starts a connect attempt unless one is running or the link is up.
    ///
    /// Returns the id of the new attempt, or of the current one if nothing was
    /// started. A new attempt cancels any earlier one still in flight.
    pub fn request_connect(&self) -> AttemptId {
        let (attempt_id, token, snapshot) = {
            let mut state = self.state.lock();
            if matches!(
                state.link,
                DeviceLinkState::Connecting | DeviceLinkState::Connected
            ) {
                return state.attempt_id;
            }

            let attempt_id = AttemptId::new();
            let token = self.supervisor.child_token();
            if let Some(previous) = state.attempt_token.replace(token.clone()) {
                previous.cancel();
            }
            state.attempt_id = attempt_id;
            state.last_error = None;
            state.link = DeviceLinkState::Connecting;
            (attempt_id, token, state.commit(self.address))
        };

        tracing::debug!(address = %self.address, attempt = %attempt_id, "Connect requested");
        self.publish(snapshot);

        if let Some(this) = self.this.upgrade() {
            self.supervisor.spawn("connect-attempt", async move {
                this.run_attempt(attempt_id, token).await;
            });
        }
        attempt_id
    }

    /// Tears the link down.
    ///
    /// A manual disconnect holds off the reconnect worker for a few seconds so
    /// the link is not immediately brought back. Does nothing while another
    /// disconnect is in progress.
    pub fn request_disconnect(&self, is_manual: bool) {
        let snapshot = {
            let mut state = self.state.lock();
            if state.link == DeviceLinkState::Disconnecting {
                return;
            }
            state.link = DeviceLinkState::Disconnecting;
            if let Some(token) = state.attempt_token.take() {
                token.cancel();
            }
            state.commit(self.address)
        };
        tracing::debug!(address = %self.address, is_manual, "Disconnect requested");
        self.publish(snapshot);

        self.service.disconnect(self.address);

        let snapshot = {
            let mut state = self.state.lock();
            state.link = DeviceLinkState::Disconnected;
            state.connected_since = None;
            if is_manual {
                let hold = clock::add(self.clock.now(), self.policy.manual_hold());
                state.hold_until = Some(hold);
                state.next_reconnect = Some(hold);
            }
            state.commit(self.address)
        };
        self.publish(snapshot);

        self.ensure_reconnect_worker();
    }

    /// Enables or disables background reconnection.
    ///
    /// Enabling while the link is down schedules an immediate retry.
    pub fn set_auto_reconnect_enabled(&self, enabled: bool) {
        let snapshot = {
            let mut state = self.state.lock();
            state.auto_reconnect = enabled;
            if enabled && state.link != DeviceLinkState::Connected {
                state.next_reconnect = Some(self.clock.now());
            }
            state.commit(self.address)
        };
        tracing::debug!(address = %self.address, enabled, "Auto-reconnect changed");
        self.publish(snapshot);

        self.ensure_reconnect_worker();
    }

    async fn run_attempt(&self, attempt_id: AttemptId, token: CancellationToken) {
        let outcome = self
            .service
            .ensure_connected(self.address, CacheMode::Uncached, &token)
            .await;

        let (snapshot, failed) = {
            let mut state = self.state.lock();
            if token.is_cancelled() || state.attempt_id != attempt_id {
                tracing::trace!(address = %self.address, attempt = %attempt_id, "Discarding stale attempt");
                return;
            }
            state.attempt_token = None;

            let now = self.clock.now();
            let failed = match outcome {
                Ok(true) => {
                    state.link = DeviceLinkState::Connected;
                    state.connected_since.get_or_insert(now);
                    state.last_error = None;
                    state.hold_until = None;
                    false
                }
                Ok(false) => {
                    state.link = DeviceLinkState::Failed;
                    state.last_error = Some(ERROR_CODE_UNREACHABLE.to_string());
                    true
                }
                Err(e) => {
                    state.link = DeviceLinkState::Failed;
                    state.last_error = Some(e.code());
                    true
                }
            };
            if failed {
                state.schedule_retry(now, self.policy.retry_jitter());
            }
            (state.commit(self.address), failed)
        };

        if failed {
            tracing::warn!(
                address = %self.address,
                attempt = %attempt_id,
                error = snapshot.last_error.as_deref().unwrap_or_default(),
                "Connect attempt failed"
            );
        } else {
            tracing::info!(address = %self.address, attempt = %attempt_id, "Connect attempt succeeded");
        }
        self.publish(snapshot);

        if failed {
            self.ensure_reconnect_worker();
        }
    }

    fn on_link_status(&self, status: LinkStatus) {
        let mut snapshots = Vec::with_capacity(2);
        {
            let mut state = self.state.lock();
            if state.link == DeviceLinkState::Disconnecting {
                return;
            }
            let now = self.clock.now();
            match status {
                LinkStatus::Connected => {
                    state.link = DeviceLinkState::Connected;
                    state.connected_since.get_or_insert(now);
                }
                LinkStatus::Disconnected => {
                    if state.link == DeviceLinkState::Connected {
                        state.link = DeviceLinkState::Disconnecting;
                        snapshots.push(state.commit(self.address));
                    }
                    state.link = DeviceLinkState::Disconnected;
                    state.connected_since = None;
                    if state.auto_reconnect {
                        state.schedule_retry(now, self.policy.retry_jitter());
                    }
                }
            }
            snapshots.push(state.commit(self.address));
        }
        tracing::debug!(address = %self.address, ?status, "Link status applied");
        for snapshot in snapshots {
            self.publish(snapshot);
        }

        if status == LinkStatus::Disconnected {
            self.ensure_reconnect_worker();
        }
    }

    fn ensure_reconnect_worker(&self) {
        {
            let mut state = self.state.lock();
            if !state.auto_reconnect || state.worker_active {
                return;
            }
            state.worker_active = true;
        }

        let Some(this) = self.this.upgrade() else {
            return;
        };
        tracing::debug!(address = %self.address, "Starting reconnect worker");
        self.supervisor.spawn("reconnect-worker", async move {
            this.reconnect_loop().await;
        });
    }

    async fn reconnect_loop(&self) {
        let mut failures = 0_u32;
        loop {
            let Some(wait) = self.next_wait() else {
                tracing::debug!(address = %self.address, "Reconnect worker stopped");
                return;
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
                continue;
            }

            let attempt_id = self.request_connect();
            tokio::task::yield_now().await;
            self.wait_for_attempt().await;

            let snapshot = {
                let mut state = self.state.lock();
                let now = self.clock.now();
                if state.link == DeviceLinkState::Connected {
                    failures = 0;
                    state.next_reconnect = Some(clock::add(now, self.policy.retry_jitter()));
                } else {
                    failures = failures.saturating_add(1);
                    let delay = self.policy.backoff.delay_for_attempt(failures);
                    state.schedule_retry(now, delay);
                }
                state.commit(self.address)
            };
            tracing::debug!(
                address = %self.address,
                attempt = %attempt_id,
                failures,
                state = %snapshot.state,
                "Reconnect round finished"
            );
            self.publish(snapshot);
        }
    }

    /// Returns how long the worker should sleep before its next round, or
    /// `None` if it should exit. Exiting clears the worker flag under the same
    /// lock so a concurrent `ensure_reconnect_worker` cannot miss it.
    fn next_wait(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.auto_reconnect || state.link == DeviceLinkState::Connected {
            state.worker_active = false;
            return None;
        }
        let now = self.clock.now();
        Some(
            state
                .next_reconnect
                .map_or(Duration::ZERO, |next| clock::until(now, next)),
        )
    }

    async fn wait_for_attempt(&self) {
        let started = Instant::now();
        while self.state.lock().link == DeviceLinkState::Connecting {
            if started.elapsed() >= self.policy.poll_budget {
                tracing::warn!(address = %self.address, "Connect attempt still pending after poll budget");
                return;
            }
            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }

    fn publish(&self, snapshot: DeviceConnectionSnapshot) {
        tracing::trace!(
            address = %self.address,
            state = %snapshot.state,
            sequence = snapshot.sequence,
            "Publishing connection state"
        );
        self.bus.publish(ConnectionStateChanged { snapshot });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn commit_bumps_sequence() {
        let mut state = ControllerState::default();
        let address = Address::new(1);
        assert_eq!(state.commit(address).sequence, 1);
        assert_eq!(state.commit(address).sequence, 2);
    }

    #[test]
    fn busy_follows_link_state() {
        let mut state = ControllerState {
            link: DeviceLinkState::Connecting,
            ..ControllerState::default()
        };
        assert!(state.snapshot(Address::new(1)).busy);
        state.link = DeviceLinkState::Failed;
        assert!(!state.snapshot(Address::new(1)).busy);
    }

    #[test]
    fn retry_overwrites_earlier_schedule() {
        let now = t0();
        let mut state = ControllerState {
            next_reconnect: Some(clock::add(now, Duration::from_secs(3))),
            ..ControllerState::default()
        };

        state.schedule_retry(now, Duration::from_secs(1));
        assert_eq!(state.next_reconnect, Some(clock::add(now, Duration::from_secs(1))));
    }

    #[test]
    fn manual_hold_defers_retry() {
        let now = t0();
        let hold = clock::add(now, Duration::from_secs(10));
        let mut state = ControllerState {
            hold_until: Some(hold),
            ..ControllerState::default()
        };

        state.schedule_retry(now, Duration::from_secs(2));
        assert_eq!(state.next_reconnect, Some(hold));

        state.schedule_retry(now, Duration::from_secs(20));
        assert_eq!(state.next_reconnect, Some(clock::add(now, Duration::from_secs(20))));
    }
}
