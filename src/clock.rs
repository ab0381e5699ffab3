// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Current-time sources.
//!
//! Every service reads wall-clock time through the [`Clock`] trait so that
//! timestamps in snapshots can be made deterministic in tests:
//!
//! - [`SystemClock`] - the operating system clock
//! - [`MonotonicClock`] - anchored once, then advanced by the tokio clock;
//!   follows paused time in `#[tokio::test(start_paused = true)]`
//! - [`ManualClock`] - only moves when told to

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Source of the current UTC time.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock anchored to the wall clock at creation and advanced by
/// [`tokio::time::Instant`].
///
/// It never jumps when the system clock is adjusted, and under a paused tokio
/// runtime it advances exactly as far as the runtime's virtual time.
pub struct MonotonicClock {
    anchor_utc: DateTime<Utc>,
    anchor_instant: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at the current system time.
    #[must_use]
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Creates a clock that reads `anchor` right now.
    #[must_use]
    pub fn anchored_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor_utc: anchor,
            anchor_instant: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        add(self.anchor_utc, self.anchor_instant.elapsed())
    }
}

impl fmt::Debug for MonotonicClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicClock")
            .field("anchor_utc", &self.anchor_utc)
            .finish_non_exhaustive()
    }
}

/// Clock that only moves when [`set`](Self::set) or [`advance`](Self::advance)
/// is called.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now = add(*now, delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Returns `at + delta`, saturating instead of overflowing.
#[must_use]
pub fn add(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delta)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns how long from `from` until `to`, or zero if `to` is not later.
#[must_use]
pub fn until(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
