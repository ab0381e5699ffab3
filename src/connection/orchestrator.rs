// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lazily populated set of connection controllers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{ConnectionService, DeviceConnectionController, DeviceConnectionSnapshot, ReconnectPolicy};
use crate::clock::Clock;
use crate::event::EventBus;
use crate::radio::Radio;
use crate::supervisor::Supervisor;
use crate::types::{Address, AttemptId};

/// Entry point for connection management.
///
/// Holds one [`DeviceConnectionController`] per address, created on first
/// use and kept for the registry's lifetime. Every operation forwards to the
/// address's controller.
pub struct ConnectionOrchestratorRegistry<R: Radio> {
    service: Arc<ConnectionService<R>>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    supervisor: Supervisor,
    policy: ReconnectPolicy,
    controllers: RwLock<HashMap<Address, Arc<DeviceConnectionController<R>>>>,
}

impl<R: Radio> ConnectionOrchestratorRegistry<R> {
    /// Creates an empty registry.
    pub fn new(
        service: Arc<ConnectionService<R>>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        supervisor: Supervisor,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            service,
            bus,
            clock,
            supervisor,
            policy,
            controllers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the controller for `address`, creating it if needed.
    pub fn get(&self, address: Address) -> Arc<DeviceConnectionController<R>> {
        if let Some(controller) = self.controllers.read().get(&address) {
            return Arc::clone(controller);
        }

        let mut controllers = self.controllers.write();
        let controller = controllers.entry(address).or_insert_with(|| {
            tracing::debug!(%address, "Creating connection controller");
            DeviceConnectionController::new(
                address,
                Arc::clone(&self.service),
                self.bus.clone(),
                Arc::clone(&self.clock),
                self.supervisor.clone(),
                self.policy.clone(),
            )
        });
        Arc::clone(controller)
    }

    /// Returns the current connection state of `address`.
    pub fn snapshot(&self, address: Address) -> DeviceConnectionSnapshot {
        self.get(address).snapshot()
    }

    /// Starts a connect attempt for `address`.
    ///
    /// See [`DeviceConnectionController::request_connect`].
    pub fn request_connect(&self, address: Address) -> AttemptId {
        self.get(address).request_connect()
    }

    /// Disconnects `address`.
    ///
    /// See [`DeviceConnectionController::request_disconnect`].
    pub fn request_disconnect(&self, address: Address, is_manual: bool) {
        self.get(address).request_disconnect(is_manual);
    }

    /// Enables or disables background reconnection for `address`.
    pub fn set_auto_reconnect_enabled(&self, address: Address, enabled: bool) {
        self.get(address).set_auto_reconnect_enabled(enabled);
    }

    /// Returns every address that has a controller.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.controllers.read().keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Returns the shared connection service.
    #[must_use]
    pub fn service(&self) -> &Arc<ConnectionService<R>> {
        &self.service
    }
}
