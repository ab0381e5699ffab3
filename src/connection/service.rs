// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gated connect attempts and tracked device sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ConnectConfig;
use crate::clock::Clock;
use crate::error::{ERROR_CODE_TIMEOUT, ERROR_CODE_UNREACHABLE, Error, Result};
use crate::event::{DeviceUpserted, EventBus, LinkStatusChanged};
use crate::radio::{BleDevice, Radio};
use crate::registry::{DeviceRegistry, MessageKind, MessageLog, MessageRecord};
use crate::supervisor::Supervisor;
use crate::types::{Address, CacheMode, LinkStatus};

/// A device handle the service keeps open after a successful connect.
struct TrackedSession<D> {
    device: Arc<D>,
    /// Stops the task forwarding the handle's status changes.
    forwarder: CancellationToken,
}

/// Opens, verifies and tracks device sessions.
///
/// At most one connect attempt per address runs at any time, process-wide.
/// A connected handle is kept until [`disconnect`](Self::disconnect) or the
/// next successful connect for the same address replaces it. While tracked,
/// the handle's physical status changes are republished as
/// [`LinkStatusChanged`] and mirrored into the [`DeviceRegistry`].
/// Service enumerations and failed attempts are recorded in the
/// [`MessageLog`].
pub struct ConnectionService<R: Radio> {
    radio: Arc<R>,
    registry: Arc<DeviceRegistry>,
    messages: Arc<MessageLog>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    supervisor: Supervisor,
    config: ConnectConfig,
    gates: Mutex<HashMap<Address, Arc<Semaphore>>>,
    sessions: Mutex<HashMap<Address, TrackedSession<R::Device>>>,
}

impl<R: Radio> ConnectionService<R> {
    /// Creates a service with no tracked sessions.
    pub fn new(
        radio: Arc<R>,
        registry: Arc<DeviceRegistry>,
        messages: Arc<MessageLog>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        supervisor: Supervisor,
        config: ConnectConfig,
    ) -> Self {
        Self {
            radio,
            registry,
            messages,
            bus,
            clock,
            supervisor,
            config,
            gates: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the connect configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Makes sure a verified session to `address` is open.
    ///
    /// Returns immediately if a tracked handle already reports a link.
    /// Otherwise waits for the address's connect gate, opens a handle and
    /// enumerates GATT services (uncached first, then `cache_mode`, then
    /// cached) until one enumeration succeeds, backing off between rounds.
    ///
    /// Returns `Ok(false)` if the radio does not know the device.
    ///
    /// # Errors
    ///
    /// - [`Error::Canceled`] if `cancel` fired
    /// - [`Error::Timeout`] if the attempt budget elapsed first
    /// - [`Error::Radio`] if the radio failed to open a handle
    pub async fn ensure_connected(
        &self,
        address: Address,
        cache_mode: CacheMode,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if let Some(device) = self.tracked_device(address)
            && device.connection_status().is_connected()
        {
            tracing::trace!(%address, "Session already connected");
            self.set_registry_status(address, LinkStatus::Connected);
            return Ok(true);
        }

        let deadline = Instant::now() + self.config.attempt_timeout;
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(%address, "Connect canceled");
                Err(Error::Canceled)
            }
            outcome = tokio::time::timeout_at(deadline, self.connect_gated(address, cache_mode, cancel)) => {
                outcome.unwrap_or_else(|_| {
                    tracing::warn!(
                        %address,
                        timeout_ms = self.config.attempt_timeout.as_millis(),
                        "Connect attempt timed out"
                    );
                    self.log_error(address, ERROR_CODE_TIMEOUT);
                    Err(Error::Timeout)
                })
            }
        }
    }

    async fn connect_gated(
        &self,
        address: Address,
        cache_mode: CacheMode,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let gate = self.gate(address);
        let _permit = gate.acquire().await.map_err(|_| Error::Canceled)?;

        let Some(device) = self.radio.connect(address).await? else {
            tracing::debug!(%address, "Device not known to the radio");
            self.log_error(address, ERROR_CODE_UNREACHABLE);
            self.set_registry_status(address, LinkStatus::Disconnected);
            return Ok(false);
        };

        let modes = probe_order(cache_mode);
        let mut delay = self.config.retry.initial_delay;
        let mut round = 0_u32;
        'probe: loop {
            round += 1;
            for mode in &modes {
                self.log_traffic(address, MessageKind::ServiceQueryOut, format!("{mode:?}"));
                let result = device.services(*mode).await;
                if result.status.is_success() {
                    tracing::debug!(%address, ?mode, round, "Services enumerated");
                    let found = format!("{} services", result.services.len());
                    self.log_traffic(address, MessageKind::ServiceQueryIn, found);
                    break 'probe;
                }
                tracing::trace!(%address, ?mode, status = %result.status, "Service enumeration failed");
                self.log_error(address, format!("{mode:?}: {}", result.status));
            }

            let wait = self.config.retry.jittered(delay);
            tracing::debug!(%address, round, wait_ms = wait.as_millis(), "Retrying service enumeration");
            tokio::time::sleep(wait).await;
            delay = self.config.retry.next_delay(delay);
        }

        if let Err(e) = device.session_info().await {
            tracing::debug!(%address, error = %e, "Session info unavailable");
        }

        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        self.track(address, device, cancel);
        Ok(true)
    }

    /// Records `device` as the tracked session for `address` and announces
    /// the link.
    fn track(&self, address: Address, device: R::Device, cancel: &CancellationToken) {
        self.set_registry_status(address, LinkStatus::Connected);

        let device = Arc::new(device);
        let mut status_rx = device.status_changes();
        let forwarder = self.supervisor.child_token();
        let previous = self.sessions.lock().insert(
            address,
            TrackedSession {
                device,
                forwarder: forwarder.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(%address, "Replacing tracked session");
            previous.forwarder.cancel();
        }

        let registry = Arc::clone(&self.registry);
        let bus = self.bus.clone();
        let clock = Arc::clone(&self.clock);
        self.supervisor.spawn("link-status-forwarder", async move {
            loop {
                tokio::select! {
                    biased;
                    () = forwarder.cancelled() => break,
                    status = status_rx.recv() => match status {
                        Ok(status) => {
                            tracing::debug!(%address, ?status, "Link status changed");
                            bus.publish(LinkStatusChanged {
                                address,
                                status,
                                timestamp: clock.now(),
                            });
                            update_registry(&registry, &bus, clock.as_ref(), address, status);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(%address, skipped, "Link status receiver lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        if cancel.is_cancelled() {
            return;
        }
        tracing::info!(%address, "Connected");
        self.publish_link(address, LinkStatus::Connected);
    }

    /// Closes the session to `address`.
    ///
    /// Marks the device disconnected, publishes [`LinkStatusChanged`] and
    /// releases the tracked handle, if any.
    pub fn disconnect(&self, address: Address) {
        self.set_registry_status(address, LinkStatus::Disconnected);
        self.publish_link(address, LinkStatus::Disconnected);

        let session = self.sessions.lock().remove(&address);
        if let Some(session) = session {
            session.forwarder.cancel();
            tracing::info!(%address, "Session released");
        }
    }

    /// Checks that the device answers a GATT session query.
    ///
    /// Uses the tracked handle if there is one, otherwise opens a temporary
    /// handle that is released afterwards. Returns `Ok(false)` if the device
    /// is unknown or did not answer.
    ///
    /// # Errors
    ///
    /// - [`Error::Canceled`] if `cancel` fired
    /// - [`Error::Radio`] if the radio failed to open a handle
    pub async fn probe_session(&self, address: Address, cancel: &CancellationToken) -> Result<bool> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Canceled),
            result = self.probe_device(address) => result,
        }
    }

    async fn probe_device(&self, address: Address) -> Result<bool> {
        let device = match self.tracked_device(address) {
            Some(device) => device,
            None => match self.radio.connect(address).await? {
                Some(device) => Arc::new(device),
                None => return Ok(false),
            },
        };
        match device.session_info().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(%address, error = %e, "Session probe failed");
                Ok(false)
            }
        }
    }

    /// Returns `true` if a session to `address` is tracked.
    #[must_use]
    pub fn is_tracked(&self, address: Address) -> bool {
        self.sessions.lock().contains_key(&address)
    }

    /// Returns the number of tracked sessions.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn tracked_device(&self, address: Address) -> Option<Arc<R::Device>> {
        self.sessions
            .lock()
            .get(&address)
            .map(|session| Arc::clone(&session.device))
    }

    fn gate(&self, address: Address) -> Arc<Semaphore> {
        Arc::clone(
            self.gates
                .lock()
                .entry(address)
                .or_insert_with(|| Arc::new(Semaphore::new(1))),
        )
    }

    fn log_traffic(&self, address: Address, kind: MessageKind, text: String) {
        self.messages
            .append(MessageRecord::traffic(address, kind, self.clock.now()).with_text(text));
    }

    fn log_error(&self, address: Address, code: impl Into<String>) {
        self.messages
            .append(MessageRecord::error(address, code, self.clock.now()));
    }

    fn set_registry_status(&self, address: Address, status: LinkStatus) {
        update_registry(&self.registry, &self.bus, self.clock.as_ref(), address, status);
    }

    fn publish_link(&self, address: Address, status: LinkStatus) {
        self.bus.publish(LinkStatusChanged {
            address,
            status,
            timestamp: self.clock.now(),
        });
    }
}

/// Returns the cache modes to try, in order, for one probe round.
fn probe_order(requested: CacheMode) -> Vec<CacheMode> {
    let mut modes = vec![CacheMode::Uncached];
    if requested != CacheMode::Uncached {
        modes.push(requested);
    }
    modes.push(CacheMode::Cached);
    modes
}

fn update_registry(
    registry: &DeviceRegistry,
    bus: &EventBus,
    clock: &dyn Clock,
    address: Address,
    status: LinkStatus,
) {
    if let Some(device) = registry.set_link_status(address, status, clock.now()) {
        bus.publish(DeviceUpserted {
            device,
            is_new: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_order_uncached_first() {
        assert_eq!(
            probe_order(CacheMode::Uncached),
            vec![CacheMode::Uncached, CacheMode::Cached]
        );
        assert_eq!(
            probe_order(CacheMode::Cached),
            vec![CacheMode::Uncached, CacheMode::Cached, CacheMode::Cached]
        );
    }
}
