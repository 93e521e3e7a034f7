// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A one-shot broadcast shutdown signal.
///
/// Every clone observes the same state. Cancelling is idempotent, so it is fine for
/// multiple parties (the OS service callback, the fault handler) to fire it concurrently.
/// Once cancelled it can never be reset; a fresh token has to be created for the next run.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: CancellationToken,
}

impl ShutdownToken {
    pub fn new() -> Self {
        ShutdownToken::default()
    }

    /// Fires the signal. Calling it more than once has no additional effect.
    pub fn cancel(&self) {
        self.inner.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Returns a future that resolves once the token has been cancelled.
    /// It resolves immediately if that has already happened.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }

    /// Runs the provided future until either it completes or the token gets cancelled.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            res = fut => Some(res),
        }
    }
}
