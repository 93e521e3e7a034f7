// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::UpdateError;
use async_trait::async_trait;
use std::env;

pub(crate) mod http;
pub(crate) mod scheduler;
pub(crate) mod types;

pub(crate) use http::HttpUpdater;
pub(crate) use scheduler::UpdateScheduler;

/// Fetches, verifies and installs new versions of the supervised executable.
#[async_trait]
pub(crate) trait Updater: Send + Sync {
    /// Runs a single update cycle.
    /// Returns `true` only if a new version has been installed.
    async fn do_update(&self) -> Result<bool, UpdateError>;

    /// Version of the currently installed executable, if known.
    fn current_version(&self) -> Option<String>;

    /// Platform identifier used for selecting the artifact.
    fn arch(&self) -> String {
        os_arch()
    }
}

pub(crate) fn os_arch() -> String {
    let os = env::consts::OS;
    let arch = env::consts::ARCH;
    // a special case for macos because of course it's its own special snowflake
    if os == "macos" {
        format!("darwin-{arch}")
    } else {
        format!("{os}-{arch}")
    }
}
