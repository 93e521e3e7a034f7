// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::ShutdownToken;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Join group for a set of background tasks sharing a single [ShutdownToken].
///
/// Cloning produces another handle to the same group.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTracker {
    tracker: TaskTracker,
    shutdown_token: ShutdownToken,
}

impl ShutdownTracker {
    pub fn new() -> Self {
        ShutdownTracker::default()
    }

    /// Spawn the provided future on the current Tokio runtime and track it.
    #[track_caller]
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Waits until the tracker is both closed and empty.
    async fn wait_for_tracker(&self) {
        self.tracker.wait().await
    }

    /// Closes the tracker so that [`wait_for_tracker`](Self::wait_for_tracker) could complete.
    /// Returns `false` if it was already closed.
    fn close_tracker(&self) -> bool {
        self.tracker.close()
    }

    /// Number of tracked tasks that haven't finished yet.
    pub fn tracked_tasks(&self) -> usize {
        self.tracker.len()
    }

    pub fn clone_shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Cancels the shared token, closes the tracker and waits for every tracked task to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.close_tracker();
        self.wait_for_tracker().await;
    }
}
