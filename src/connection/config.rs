// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{self, BackoffPolicy};

/// Timing of a single connect attempt.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use blelink::ConnectConfig;
///
/// let config = ConnectConfig::default()
///     .with_attempt_timeout(Duration::from_secs(10));
/// assert_eq!(config.attempt_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Overall budget of one attempt, gate wait included.
    pub attempt_timeout: Duration,
    /// Delay between rounds of GATT service probes.
    pub retry: BackoffPolicy,
}

impl ConnectConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Sets the probe retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            retry: BackoffPolicy::new()
                .with_initial_delay(Duration::from_millis(800))
                .with_max_delay(Duration::from_secs(2)),
        }
    }
}

/// Background reconnection schedule of a connection controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Shortest hold after a manual disconnect.
    pub manual_hold_min: Duration,
    /// Longest hold after a manual disconnect.
    pub manual_hold_max: Duration,
    /// Shortest retry delay after a failed attempt or a link loss.
    pub retry_jitter_min: Duration,
    /// Longest retry delay after a failed attempt or a link loss.
    pub retry_jitter_max: Duration,
    /// Reconnect worker backoff per consecutive failure.
    pub backoff: BackoffPolicy,
    /// Interval at which the worker polls a pending attempt.
    pub poll_interval: Duration,
    /// Longest the worker waits for a pending attempt to resolve.
    pub poll_budget: Duration,
}

impl ReconnectPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hold range after a manual disconnect.
    #[must_use]
    pub fn with_manual_hold(mut self, min: Duration, max: Duration) -> Self {
        self.manual_hold_min = min;
        self.manual_hold_max = max;
        self
    }

    /// Sets the retry delay range after a failure or link loss.
    #[must_use]
    pub fn with_retry_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.retry_jitter_min = min;
        self.retry_jitter_max = max;
        self
    }

    /// Sets the worker backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the worker poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the worker poll budget.
    #[must_use]
    pub fn with_poll_budget(mut self, budget: Duration) -> Self {
        self.poll_budget = budget;
        self
    }

    /// Returns a random hold applied after a manual disconnect.
    #[must_use]
    pub fn manual_hold(&self) -> Duration {
        backoff::uniform(self.manual_hold_min, self.manual_hold_max)
    }

    /// Returns a random delay applied after a failure or link loss.
    #[must_use]
    pub fn retry_jitter(&self) -> Duration {
        backoff::uniform(self.retry_jitter_min, self.retry_jitter_max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            manual_hold_min: Duration::from_secs(8),
            manual_hold_max: Duration::from_secs(13),
            retry_jitter_min: Duration::from_secs(1),
            retry_jitter_max: Duration::from_secs(3),
            backoff: BackoffPolicy::new()
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(30))
                .with_clamp_jittered(true),
            poll_interval: Duration::from_millis(100),
            // Attempt timeout plus a grace period for the result to land
            poll_budget: Duration::from_secs(31),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connect_config() {
        let config = ConnectConfig::default();
        assert_eq!(config.attempt_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(800));
        assert_eq!(config.retry.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn manual_hold_in_range() {
        let policy = ReconnectPolicy::default();
        for _ in 0..100 {
            let hold = policy.manual_hold();
            assert!(hold >= Duration::from_secs(8) && hold <= Duration::from_secs(13));
        }
    }

    #[test]
    fn retry_jitter_in_range() {
        let policy = ReconnectPolicy::default()
            .with_retry_jitter(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..100 {
            let delay = policy.retry_jitter();
            assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
        }
    }
}
