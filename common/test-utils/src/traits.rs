// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::future::IntoFuture;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio::time::{timeout, Timeout};

/// Default deadline used by [Timeboxed::timeboxed].
pub const DEFAULT_TIMEBOX: Duration = Duration::from_millis(200);

pub trait Timeboxed: IntoFuture + Sized {
    /// Bounds the future with the [DEFAULT_TIMEBOX] deadline.
    fn timeboxed(self) -> Timeout<Self::IntoFuture> {
        self.execute_with_deadline(DEFAULT_TIMEBOX)
    }

    fn execute_with_deadline(self, deadline: Duration) -> Timeout<Self::IntoFuture> {
        timeout(deadline, self)
    }
}

impl<T> Timeboxed for T where T: IntoFuture + Sized {}

pub trait ElapsedExt {
    fn has_elapsed(&self) -> bool;
}

impl<T> ElapsedExt for Result<T, Elapsed> {
    fn has_elapsed(&self) -> bool {
        self.is_err()
    }
}
