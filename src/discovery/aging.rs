// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock::{self, Clock};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::supervisor::Supervisor;

/// Record expiry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingConfig {
    /// Records unseen for longer than this are removed.
    pub ttl: Duration,
    /// Sweep interval.
    pub sweep_interval: Duration,
}

impl AgingConfig {
    /// Sets the time to live, at least one second.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.max(Duration::from_secs(1));
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Periodically drops devices that stopped advertising.
///
/// Pinned and connected devices are never removed.
pub struct DeviceAgingService {
    registry: Arc<DeviceRegistry>,
    clock: Arc<dyn Clock>,
    supervisor: Supervisor,
    config: AgingConfig,
    scope: Mutex<Option<Supervisor>>,
}

impl DeviceAgingService {
    /// Creates a stopped service.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        clock: Arc<dyn Clock>,
        supervisor: Supervisor,
        config: AgingConfig,
    ) -> Self {
        Self {
            registry,
            clock,
            supervisor,
            config,
            scope: Mutex::new(None),
        }
    }

    /// Starts the sweep loop. Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.scope.lock();
        if slot.is_some() {
            return;
        }
        let scope = self.supervisor.child();
        let this = Arc::clone(self);
        scope.spawn("device-aging", async move {
            let period = this.config.sweep_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.sweep();
            }
        });
        *slot = Some(scope);
    }

    /// Stops the sweep loop and waits for it to finish.
    pub async fn stop(&self) {
        let scope = self.scope.lock().take();
        if let Some(scope) = scope {
            scope.shutdown().await;
        }
    }

    /// Removes every expired record now and returns the removed ones.
    pub fn sweep(&self) -> Vec<DeviceRecord> {
        let now = self.clock.now();
        let ttl = self.config.ttl;
        let removed = self.registry.remove_where(|record| is_expired(record, now, ttl));
        for record in &removed {
            tracing::debug!(address = %record.address, "Device aged out");
        }
        removed
    }
}

fn is_expired(record: &DeviceRecord, now: DateTime<Utc>, ttl: Duration) -> bool {
    !record.pinned
        && !record.link_status.is_connected()
        && clock::until(record.last_seen, now) > ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{Address, LinkStatus};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn expiry_rules() {
        let ttl = Duration::from_secs(30);
        let stale = clock::add(t0(), Duration::from_secs(31));
        let record = DeviceRecord::new(Address::new(1), t0());

        assert!(is_expired(&record, stale, ttl));
        assert!(!is_expired(&record, clock::add(t0(), ttl), ttl));
        assert!(!is_expired(&record.clone().with_pinned(true), stale, ttl));
        assert!(!is_expired(
            &record.with_link_status(LinkStatus::Connected),
            stale,
            ttl
        ));
    }

    #[test]
    fn sweep_keeps_pinned_and_connected() {
        let registry = Arc::new(DeviceRegistry::new());
        let clock = Arc::new(ManualClock::new(t0()));
        registry.upsert(DeviceRecord::new(Address::new(1), t0()));
        registry.upsert(DeviceRecord::new(Address::new(2), t0()).with_pinned(true));
        registry.upsert(
            DeviceRecord::new(Address::new(3), t0()).with_link_status(LinkStatus::Connected),
        );

        let aging = DeviceAgingService::new(
            Arc::clone(&registry),
            clock.clone(),
            Supervisor::new(),
            AgingConfig::default(),
        );

        assert!(aging.sweep().is_empty());
        clock.advance(Duration::from_secs(45));
        let removed = aging.sweep();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].address, Address::new(1));
        assert_eq!(registry.len(), 2);
    }
}
