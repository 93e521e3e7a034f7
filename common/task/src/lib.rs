// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

#![warn(clippy::expect_used)]
#![warn(clippy::unwrap_used)]

pub mod cancellation;
pub mod restart;
pub mod signal;

pub use cancellation::token::ShutdownToken;
pub use cancellation::tracker::ShutdownTracker;
pub use restart::{restart_signal, RestartListener, RestartRequester};
pub use signal::{wait_for_signal, ReloadSignal, ShutdownSignal};
