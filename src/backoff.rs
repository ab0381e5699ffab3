// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exponential backoff with multiplicative jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff schedule.
///
/// The nominal delay after `k` consecutive failures is
/// `min(max_delay, initial_delay * multiplier^(k-1))`. The jittered delay
/// multiplies it by a random factor in `[jitter_min, jitter_max]` and clamps
/// the result to `[initial_delay, max_delay]` when
/// [`clamp_jittered`](Self::clamp_jittered) is set.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use blelink::BackoffPolicy;
///
/// let policy = BackoffPolicy::new()
///     .with_initial_delay(Duration::from_secs(1))
///     .with_max_delay(Duration::from_secs(30));
///
/// assert_eq!(policy.nominal_delay(1), Duration::from_secs(1));
/// assert_eq!(policy.nominal_delay(4), Duration::from_secs(8));
/// assert_eq!(policy.nominal_delay(10), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound of the nominal delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Smallest jitter factor.
    pub jitter_min: f64,
    /// Largest jitter factor.
    pub jitter_max: f64,
    /// Clamp jittered delays to `[initial_delay, max_delay]`.
    pub clamp_jittered: bool,
}

impl BackoffPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum nominal delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter range.
    #[must_use]
    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Enables or disables clamping of jittered delays.
    #[must_use]
    pub fn with_clamp_jittered(mut self, clamp: bool) -> Self {
        self.clamp_jittered = clamp;
        self
    }

    /// Returns the nominal delay after `failures` consecutive failures.
    ///
    /// Zero and one failures both yield the initial delay.
    #[must_use]
    pub fn nominal_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        scale(self.initial_delay, factor).min(self.max_delay)
    }

    /// Returns the jittered delay after `failures` consecutive failures.
    #[must_use]
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        self.jittered(self.nominal_delay(failures))
    }

    /// Applies a random jitter factor to `delay`.
    #[must_use]
    pub fn jittered(&self, delay: Duration) -> Duration {
        let jittered = scale(delay, factor(self.jitter_min, self.jitter_max))
            .max(Duration::from_millis(1));
        if self.clamp_jittered {
            jittered.clamp(self.initial_delay, self.max_delay.max(self.initial_delay))
        } else {
            jittered
        }
    }

    /// Returns the nominal delay that follows `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        scale(current, self.multiplier).min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_min: 0.8,
            jitter_max: 1.2,
            clamp_jittered: false,
        }
    }
}

/// Returns a random factor in `[min, max]`.
#[must_use]
pub fn factor(min: f64, max: f64) -> f64 {
    if max <= min {
        return min;
    }
    rand::rng().random_range(min..=max)
}

/// Returns a random duration in `[min, max]` with millisecond resolution.
#[must_use]
pub fn uniform(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let low = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let high = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::rng().random_range(low..=high))
}

/// Multiplies `delay` by a non-negative `factor`.
#[must_use]
pub fn scale(delay: Duration, factor: f64) -> Duration {
    if factor.is_nan() || factor <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconnect_policy() -> BackoffPolicy {
        BackoffPolicy::new().with_clamp_jittered(true)
    }

    #[test]
    fn nominal_delay_doubles_until_capped() {
        let policy = reconnect_policy();
        let secs: Vec<u64> = (1..=7)
            .map(|k| policy.nominal_delay(k).as_secs())
            .collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.nominal_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = reconnect_policy();
        for k in 1..=10 {
            let nominal = policy.nominal_delay(k);
            let low = scale(nominal, 0.8);
            let high = scale(nominal, 1.2);
            for _ in 0..200 {
                let delay = policy.delay_for_attempt(k);
                assert!(delay >= low, "k={k}: {delay:?} < {low:?}");
                assert!(delay <= high, "k={k}: {delay:?} > {high:?}");
                assert!(delay >= Duration::from_secs(1));
                assert!(delay <= Duration::from_secs(30));
            }
        }
    }

    #[test]
    fn nominal_delay_is_monotonic() {
        let policy = reconnect_policy();
        let mut previous = Duration::ZERO;
        for k in 1..=20 {
            let current = policy.nominal_delay(k);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn next_delay_is_capped() {
        let policy = BackoffPolicy::new()
            .with_initial_delay(Duration::from_millis(800))
            .with_max_delay(Duration::from_secs(2));
        let second = policy.next_delay(Duration::from_millis(800));
        assert_eq!(second, Duration::from_millis(1600));
        assert_eq!(policy.next_delay(second), Duration::from_secs(2));
    }

    #[test]
    fn uniform_respects_range() {
        for _ in 0..100 {
            let value = uniform(Duration::from_secs(8), Duration::from_secs(13));
            assert!(value >= Duration::from_secs(8));
            assert!(value <= Duration::from_secs(13));
        }
        assert_eq!(
            uniform(Duration::from_secs(2), Duration::from_secs(1)),
            Duration::from_secs(2)
        );
    }
}
