// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::service_manager::ServiceManager;
use servisor_task::ShutdownToken;
use std::env;
use tracing::{info, warn};

/// Set by systemd for every process it starts as part of a unit.
const SYSTEMD_INVOCATION_ID: &str = "INVOCATION_ID";

/// Capabilities of whatever is hosting the supervisor.
pub(crate) trait ServiceHandle: Send + Sync {
    /// Whether servisor runs in the foreground of a user session rather than under a service manager.
    fn is_interactive(&self) -> bool;

    /// Asks the host to stop the service. Must not wait for the stop to happen.
    fn request_stop(&self);
}

/// Checks whether the current process has been started by a service manager.
pub(crate) fn launched_by_service_manager() -> bool {
    if env::var_os(SYSTEMD_INVOCATION_ID).is_some() {
        return true;
    }

    #[cfg(unix)]
    {
        std::os::unix::process::parent_id() == 1
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Handle of the process executing the `service` verb.
pub(crate) struct ServiceProcessHandle {
    name: String,
    interactive: bool,
    manager: Option<Box<dyn ServiceManager>>,
    stop_requested: ShutdownToken,
}

impl ServiceProcessHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        interactive: bool,
        manager: Option<Box<dyn ServiceManager>>,
    ) -> Self {
        ServiceProcessHandle {
            name: name.into(),
            interactive,
            manager,
            stop_requested: ShutdownToken::new(),
        }
    }

    /// Gets cancelled once a stop has been requested via [ServiceHandle::request_stop].
    pub(crate) fn stop_requested(&self) -> ShutdownToken {
        self.stop_requested.clone()
    }
}

impl ServiceHandle for ServiceProcessHandle {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn request_stop(&self) {
        if !self.interactive {
            match &self.manager {
                Some(manager) => match manager.request_stop(&self.name) {
                    Ok(()) => info!("requested the service manager to stop '{}'", self.name),
                    Err(err) => warn!("failed to request the service stop: {err}"),
                },
                None => warn!("no service manager available to stop '{}'", self.name),
            }
        }

        // either way, wake up the foreground loop so the process can't linger
        self.stop_requested.cancel();
    }
}
