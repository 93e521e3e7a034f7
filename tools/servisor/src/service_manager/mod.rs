// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServiceConfig;
use crate::context::RuntimeContext;
use crate::error::ServiceControlError;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) mod systemd;

pub(crate) use systemd::SystemdServiceManager;

const MAX_SERVICE_NAME_LENGTH: usize = 256;

/// Extra time the service manager grants on top of the escalation bounds before it kills everything.
const STOP_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

/// Service control operations exposed as CLI verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlAction {
    Install,
    Uninstall,
    Start,
    Stop,
    Restart,
    Status,
}

impl ControlAction {
    pub(crate) const ALL: [ControlAction; 6] = [
        ControlAction::Install,
        ControlAction::Uninstall,
        ControlAction::Start,
        ControlAction::Stop,
        ControlAction::Restart,
        ControlAction::Status,
    ];

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Install => "install",
            ControlAction::Uninstall => "uninstall",
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::Status => "status",
        }
    }

    /// Human readable list of every valid action.
    pub(crate) fn valid_actions() -> String {
        let actions = ControlAction::ALL
            .iter()
            .map(|action| format!("\"{}\"", action.as_str()))
            .collect::<Vec<_>>();
        format!("[{}]", actions.join(" "))
    }
}

impl Display for ControlAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the platform service manager needs to know to run servisor as a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceDefinition {
    pub(crate) name: String,
    pub(crate) display_name: String,
    pub(crate) description: String,

    /// The servisor binary itself.
    pub(crate) executable: PathBuf,
    pub(crate) config_path: PathBuf,
    pub(crate) working_dir: Option<PathBuf>,

    /// How long the manager should wait for servisor to stop before killing it.
    pub(crate) stop_timeout: Duration,
}

impl ServiceDefinition {
    pub(crate) fn new(context: &RuntimeContext, config: &ServiceConfig) -> Self {
        let stop_timeout = config.debug.graceful_shutdown_timeout
            + config.debug.kill_timeout
            + STOP_TIMEOUT_MARGIN;

        ServiceDefinition {
            name: config.name.clone(),
            display_name: config.display_name.clone(),
            description: config.description.clone(),
            executable: context.executable().to_path_buf(),
            config_path: context.config_path().to_path_buf(),
            working_dir: config.working_dir().map(|dir| dir.to_path_buf()),
            stop_timeout,
        }
    }
}

/// Adapter over the platform service manager.
pub(crate) trait ServiceManager: Send + Sync {
    fn install(&self, service: &ServiceDefinition) -> Result<(), ServiceControlError>;

    fn uninstall(&self, name: &str) -> Result<(), ServiceControlError>;

    fn start(&self, name: &str) -> Result<(), ServiceControlError>;

    fn stop(&self, name: &str) -> Result<(), ServiceControlError>;

    fn restart(&self, name: &str) -> Result<(), ServiceControlError>;

    fn status(&self, name: &str) -> Result<String, ServiceControlError>;

    /// Asks the manager to stop the service without waiting for it to happen.
    /// Used by the service itself, so it must never block on its own termination.
    fn request_stop(&self, name: &str) -> Result<(), ServiceControlError>;
}

/// Service manager of the platform servisor is running on.
pub(crate) fn platform_service_manager() -> Result<Box<dyn ServiceManager>, ServiceControlError> {
    if cfg!(target_os = "linux") {
        Ok(Box::new(SystemdServiceManager::default()))
    } else {
        Err(ServiceControlError::Unsupported {
            platform: std::env::consts::OS,
        })
    }
}

/// Checks the name is usable as a service (and thus unit file) name.
/// It ends up as an argument of external commands, so anything unusual is rejected.
pub(crate) fn validate_service_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("service name cannot be empty");
    }
    if name.len() > MAX_SERVICE_NAME_LENGTH {
        return Err("service name too long (max 256 chars)");
    }
    if name.starts_with(['-', '.']) {
        return Err("service name cannot start with '-' or '.'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@.-_".contains(c))
    {
        return Err("service name contains invalid characters");
    }
    Ok(())
}
