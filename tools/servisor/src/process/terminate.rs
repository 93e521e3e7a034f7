// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::DebugConfig;
use crate::error::SupervisorError;
use crate::process::child::{ExitOutcome, MonitoredChild};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub(crate) enum TerminationOutcome {
    /// The process exited on its own after being interrupted (or had already exited).
    Graceful(ExitOutcome),

    /// The process had to be killed.
    Killed(ExitOutcome),

    /// The OS did not confirm the process was gone even after it had been killed.
    Abandoned,
}

impl TerminationOutcome {
    /// Exit of the terminated process. `None` if it had to be abandoned.
    pub(crate) fn exit(&self) -> Option<&ExitOutcome> {
        match self {
            TerminationOutcome::Graceful(exit) | TerminationOutcome::Killed(exit) => Some(exit),
            TerminationOutcome::Abandoned => None,
        }
    }
}

/// Two-stage shutdown of a child: interrupt and wait, then kill and wait.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TerminationEscalator {
    graceful_timeout: Duration,
    kill_timeout: Duration,
}

impl From<&DebugConfig> for TerminationEscalator {
    fn from(debug: &DebugConfig) -> Self {
        TerminationEscalator::new(debug.graceful_shutdown_timeout, debug.kill_timeout)
    }
}

impl TerminationEscalator {
    pub(crate) fn new(graceful_timeout: Duration, kill_timeout: Duration) -> Self {
        TerminationEscalator {
            graceful_timeout,
            kill_timeout,
        }
    }

    pub(crate) async fn terminate(&self, child: &MonitoredChild) -> TerminationOutcome {
        let pid = child.pid();
        if let Some(outcome) = child.try_outcome() {
            debug!("process {pid} has already exited with {outcome}");
            return TerminationOutcome::Graceful(outcome);
        }

        match child.interrupt().await {
            Ok(()) => {
                debug!("interrupted process {pid}");
                match timeout(self.graceful_timeout, child.exited()).await {
                    Ok(outcome) => {
                        info!("process {pid} has exited gracefully with {outcome}");
                        return TerminationOutcome::Graceful(outcome);
                    }
                    Err(_) => warn!(
                        "{}",
                        SupervisorError::TerminationTimedOut {
                            pid,
                            stage: "the interrupt",
                            timeout: self.graceful_timeout,
                        }
                    ),
                }
            }
            Err(err) => {
                warn!("failed to interrupt process {pid}: {err}. it is going to be killed instead")
            }
        }

        child.kill();
        match timeout(self.kill_timeout, child.exited()).await {
            Ok(outcome) => {
                info!("process {pid} has been killed ({outcome})");
                TerminationOutcome::Killed(outcome)
            }
            Err(_) => {
                warn!(
                    "{}",
                    SupervisorError::TerminationTimedOut {
                        pid,
                        stage: "the kill",
                        timeout: self.kill_timeout,
                    }
                );
                warn!("abandoning process {pid}");
                TerminationOutcome::Abandoned
            }
        }
    }
}
