// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Composition root.
//!
//! [`Host`] builds every service once, wires the shared registry, event bus,
//! clock and supervisor into them, and owns their lifecycle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::connection::{
    ConnectConfig, ConnectionOrchestratorRegistry, ConnectionService, ReconnectPolicy,
};
use crate::discovery::{AgingConfig, DeviceAgingService, DiscoveryService};
use crate::error::Result;
use crate::event::EventBus;
use crate::heartbeat::{HeartbeatConfig, HeartbeatService};
use crate::naming::{NameResolutionConfig, NameResolutionService};
use crate::radio::Radio;
use crate::registry::{
    DEFAULT_MESSAGE_RETENTION, DEFAULT_RETENTION, DeviceRegistry, MessageLog, SignalHistory,
};
use crate::supervisor::Supervisor;
use crate::types::ScanMode;

/// Settings of every service owned by a [`Host`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Connect attempt settings.
    pub connect: ConnectConfig,
    /// Reconnect scheduling.
    pub reconnect: ReconnectPolicy,
    /// Name resolution settings.
    pub names: NameResolutionConfig,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
    /// Record expiry.
    pub aging: AgingConfig,
    /// RSSI samples kept per device.
    pub signal_retention: usize,
    /// Log messages kept per device.
    pub message_retention: usize,
}

impl HostConfig {
    /// Sets the connect attempt settings.
    #[must_use]
    pub fn with_connect(mut self, connect: ConnectConfig) -> Self {
        self.connect = connect;
        self
    }

    /// Sets the reconnect scheduling.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the name resolution settings.
    #[must_use]
    pub fn with_names(mut self, names: NameResolutionConfig) -> Self {
        self.names = names;
        self
    }

    /// Sets the heartbeat timing.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the record expiry.
    #[must_use]
    pub fn with_aging(mut self, aging: AgingConfig) -> Self {
        self.aging = aging;
        self
    }

    /// Sets the number of RSSI samples kept per device.
    #[must_use]
    pub fn with_signal_retention(mut self, retention: usize) -> Self {
        self.signal_retention = retention;
        self
    }

    /// Sets the number of log messages kept per device.
    #[must_use]
    pub fn with_message_retention(mut self, retention: usize) -> Self {
        self.message_retention = retention;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connect: ConnectConfig::default(),
            reconnect: ReconnectPolicy::default(),
            names: NameResolutionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            aging: AgingConfig::default(),
            signal_retention: DEFAULT_RETENTION,
            message_retention: DEFAULT_MESSAGE_RETENTION,
        }
    }
}

/// Owns every service of one radio.
///
/// All background work runs under the host's root [`Supervisor`];
/// [`stop`](Self::stop) cancels it and waits until nothing is left running.
pub struct Host<R: Radio> {
    supervisor: Supervisor,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    registry: Arc<DeviceRegistry>,
    history: Arc<SignalHistory>,
    messages: Arc<MessageLog>,
    connections: Arc<ConnectionService<R>>,
    orchestrator: Arc<ConnectionOrchestratorRegistry<R>>,
    names: Arc<NameResolutionService<R>>,
    heartbeat: Arc<HeartbeatService<R>>,
    discovery: Arc<DiscoveryService<R>>,
    aging: Arc<DeviceAgingService>,
}

impl<R: Radio> Host<R> {
    /// Builds every service. Nothing runs until [`start`](Self::start).
    pub fn new(radio: Arc<R>, clock: Arc<dyn Clock>, config: HostConfig) -> Self {
        let supervisor = Supervisor::new();
        let bus = EventBus::new();
        let registry = Arc::new(DeviceRegistry::new());
        let history = Arc::new(SignalHistory::with_retention(config.signal_retention));
        let messages = Arc::new(MessageLog::with_retention(config.message_retention));

        let connections = Arc::new(ConnectionService::new(
            Arc::clone(&radio),
            Arc::clone(&registry),
            Arc::clone(&messages),
            bus.clone(),
            Arc::clone(&clock),
            supervisor.clone(),
            config.connect,
        ));
        let orchestrator = Arc::new(ConnectionOrchestratorRegistry::new(
            Arc::clone(&connections),
            bus.clone(),
            Arc::clone(&clock),
            supervisor.clone(),
            config.reconnect,
        ));
        let names = Arc::new(NameResolutionService::new(
            Arc::clone(&radio),
            Arc::clone(&registry),
            Arc::clone(&messages),
            bus.clone(),
            Arc::clone(&clock),
            supervisor.clone(),
            config.names,
        ));
        let heartbeat = HeartbeatService::new(
            Arc::clone(&connections),
            Arc::clone(&registry),
            Arc::clone(&messages),
            bus.clone(),
            Arc::clone(&clock),
            supervisor.clone(),
            config.heartbeat,
        );
        let discovery = Arc::new(DiscoveryService::new(
            radio,
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&names),
            bus.clone(),
            Arc::clone(&clock),
            supervisor.clone(),
        ));
        let aging = Arc::new(DeviceAgingService::new(
            Arc::clone(&registry),
            Arc::clone(&clock),
            supervisor.clone(),
            config.aging,
        ));

        Self {
            supervisor,
            bus,
            clock,
            registry,
            history,
            messages,
            connections,
            orchestrator,
            names,
            heartbeat,
            discovery,
            aging,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts name resolution, record aging and heartbeat probing.
    pub fn start(&self) {
        self.names.start();
        self.aging.start();
        self.heartbeat.start();
        tracing::info!("Host started");
    }

    /// Starts scanning for advertisements.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot start scanning.
    pub fn start_capture(&self, mode: ScanMode) -> Result<()> {
        self.discovery.start(mode)
    }

    /// Stops scanning.
    pub async fn stop_capture(&self) {
        self.discovery.stop().await;
    }

    /// Stops every service and waits for all background tasks to finish.
    pub async fn stop(&self) {
        self.discovery.stop().await;
        self.names.stop().await;
        self.aging.stop().await;
        self.heartbeat.stop().await;
        self.supervisor.shutdown().await;
        tracing::info!("Host stopped");
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the root supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Returns the device registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Returns the RSSI history.
    #[must_use]
    pub fn signal_history(&self) -> &Arc<SignalHistory> {
        &self.history
    }

    /// Returns the message log.
    #[must_use]
    pub fn message_log(&self) -> &Arc<MessageLog> {
        &self.messages
    }

    /// Returns the connection service.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionService<R>> {
        &self.connections
    }

    /// Returns the per-device connection controllers.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<ConnectionOrchestratorRegistry<R>> {
        &self.orchestrator
    }

    /// Returns the name resolution service.
    #[must_use]
    pub fn names(&self) -> &Arc<NameResolutionService<R>> {
        &self.names
    }

    /// Returns the heartbeat service.
    #[must_use]
    pub fn heartbeat(&self) -> &Arc<HeartbeatService<R>> {
        &self.heartbeat
    }

    /// Returns the discovery service.
    #[must_use]
    pub fn discovery(&self) -> &Arc<DiscoveryService<R>> {
        &self.discovery
    }

    /// Returns the record aging service.
    #[must_use]
    pub fn aging(&self) -> &Arc<DeviceAgingService> {
        &self.aging
    }
}
