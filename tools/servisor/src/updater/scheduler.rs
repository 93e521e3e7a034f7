// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::SupervisorError;
use crate::updater::Updater;
use servisor_task::{RestartRequester, ShutdownToken};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Background task periodically running the update cycle and requesting a restart
/// of the child whenever a new version got installed.
pub(crate) struct UpdateScheduler {
    updater: Arc<dyn Updater>,
    poll_interval: Duration,
    restart: RestartRequester,
}

impl UpdateScheduler {
    pub(crate) fn new(
        updater: Arc<dyn Updater>,
        poll_interval: Duration,
        restart: RestartRequester,
    ) -> Self {
        UpdateScheduler {
            updater,
            poll_interval,
            restart,
        }
    }

    async fn check_for_update(&self) {
        match self.updater.do_update().await {
            Ok(true) => {
                if self.restart.request() {
                    info!("a new version has been installed - requesting a restart");
                } else {
                    debug!("a new version has been installed, but a restart is already pending");
                }
            }
            Ok(false) => trace!("no new version available"),
            Err(source) => {
                warn!("{}", SupervisorError::UpdateCheckFailed { source })
            }
        }
    }

    pub(crate) async fn run(self, exit: ShutdownToken) {
        debug!(
            "starting the update scheduler with a poll interval of {}",
            humantime::format_duration(self.poll_interval)
        );

        loop {
            tokio::select! {
                biased;
                _ = exit.cancelled() => {
                    trace!("UpdateScheduler: received shutdown");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            // an update cycle can take a while, don't delay the shutdown because of it
            if exit.run_until_cancelled(self.check_for_update()).await.is_none() {
                trace!("UpdateScheduler: update cycle interrupted by shutdown");
                break;
            }
        }

        debug!("UpdateScheduler: exiting");
    }
}
