// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Supervised background tasks.
//!
//! Every background task in the crate is spawned through a [`Supervisor`].
//! Tasks are raced against a root [`CancellationToken`] and registered with a
//! [`TaskTracker`], so [`Supervisor::shutdown`] stops all of them and waits
//! for them to finish.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancellation scope shared by a group of background tasks.
///
/// Cloning is cheap; clones share the same scope.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Supervisor {
    /// Creates a new, running scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a nested scope cancelled together with this one.
    ///
    /// The nested scope can also be shut down on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            tracker: TaskTracker::new(),
        }
    }

    /// Returns a token cancelled when this scope shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Returns `true` once the scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Spawns `future` inside the scope.
    ///
    /// The task is dropped at its next suspension point once the scope is
    /// cancelled. Nothing is spawned after cancellation.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            tracing::trace!(task = name, "Scope cancelled, not spawning");
            return;
        }

        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::trace!(task = name, "Task cancelled");
                }
                () = future => {}
            }
        });
    }

    /// Returns the number of tasks still running in this scope.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }

    /// Cancels the scope and waits for every task spawned in it to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
