// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::ServiceControlError;
use crate::helpers::init_parent_dir;
use crate::service_manager::{validate_service_name, ServiceDefinition, ServiceManager};
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

pub(crate) const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";
const SYSTEMCTL: &str = "systemctl";

/// Manages servisor units through `systemctl`.
#[derive(Debug, Clone)]
pub(crate) struct SystemdServiceManager {
    unit_dir: PathBuf,
    systemctl: PathBuf,
}

impl Default for SystemdServiceManager {
    fn default() -> Self {
        SystemdServiceManager::new(DEFAULT_UNIT_DIR, SYSTEMCTL)
    }
}

/// Escapes a value placed within a double-quoted unit file argument.
fn quote(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('%', "%%");
    format!("\"{escaped}\"")
}

pub(crate) fn render_unit(service: &ServiceDefinition) -> String {
    let description = if service.description.is_empty() {
        &service.display_name
    } else {
        &service.description
    };

    let mut unit = String::new();
    // writing into a String can't fail
    let _ = writeln!(unit, "[Unit]");
    let _ = writeln!(unit, "Description={}", description.replace('%', "%%"));
    let _ = writeln!(unit, "After=network-online.target");
    let _ = writeln!(unit, "Wants=network-online.target");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Service]");
    let _ = writeln!(unit, "Type=simple");
    let _ = writeln!(
        unit,
        "ExecStart={} --config {} service",
        quote(&service.executable.to_string_lossy()),
        quote(&service.config_path.to_string_lossy())
    );
    let _ = writeln!(unit, "ExecReload=/bin/kill -HUP $MAINPID");
    if let Some(dir) = &service.working_dir {
        let _ = writeln!(
            unit,
            "WorkingDirectory={}",
            dir.to_string_lossy().replace('%', "%%")
        );
    }
    // servisor escalates the termination of its child by itself
    let _ = writeln!(unit, "KillMode=mixed");
    let _ = writeln!(unit, "TimeoutStopSec={}", service.stop_timeout.as_secs());
    let _ = writeln!(unit, "Restart=on-failure");
    let _ = writeln!(unit, "RestartSec=10");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Install]");
    let _ = writeln!(unit, "WantedBy=multi-user.target");
    unit
}

impl SystemdServiceManager {
    pub(crate) fn new<P: Into<PathBuf>, S: Into<PathBuf>>(unit_dir: P, systemctl: S) -> Self {
        SystemdServiceManager {
            unit_dir: unit_dir.into(),
            systemctl: systemctl.into(),
        }
    }

    fn unit_name(name: &str) -> Result<String, ServiceControlError> {
        validate_service_name(name).map_err(|reason| ServiceControlError::InvalidServiceName {
            name: name.to_string(),
            reason,
        })?;
        Ok(format!("{name}.service"))
    }

    fn unit_path(&self, name: &str) -> Result<PathBuf, ServiceControlError> {
        Ok(self.unit_dir.join(Self::unit_name(name)?))
    }

    fn ensure_installed(&self, name: &str) -> Result<PathBuf, ServiceControlError> {
        let path = self.unit_path(name)?;
        if !path.exists() {
            return Err(ServiceControlError::NotInstalled {
                name: name.to_string(),
            });
        }
        Ok(path)
    }

    fn command_string(&self, args: &[&str]) -> String {
        format!("{} {}", self.systemctl.display(), args.join(" "))
    }

    fn execute(&self, args: &[&str]) -> Result<Output, ServiceControlError> {
        debug!("executing `{}`", self.command_string(args));
        Command::new(&self.systemctl)
            .args(args)
            .output()
            .map_err(|source| ServiceControlError::CommandExecutionFailure {
                command: self.command_string(args),
                source,
            })
    }

    fn systemctl(&self, args: &[&str]) -> Result<String, ServiceControlError> {
        let output = self.execute(args)?;
        if !output.status.success() {
            return Err(ServiceControlError::CommandFailure {
                command: self.command_string(args),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn write_unit(path: &Path, content: &str) -> Result<(), ServiceControlError> {
        let write_failure = |source| ServiceControlError::UnitWriteFailure {
            path: path.to_path_buf(),
            source,
        };
        init_parent_dir(path).map_err(write_failure)?;
        fs::write(path, content).map_err(write_failure)
    }
}

impl ServiceManager for SystemdServiceManager {
    fn install(&self, service: &ServiceDefinition) -> Result<(), ServiceControlError> {
        let path = self.unit_path(&service.name)?;
        let unit = Self::unit_name(&service.name)?;

        Self::write_unit(&path, &render_unit(service))?;
        info!("written the unit file to {}", path.display());

        self.systemctl(&["daemon-reload"])?;
        self.systemctl(&["enable", &unit])?;
        Ok(())
    }

    fn uninstall(&self, name: &str) -> Result<(), ServiceControlError> {
        let path = self.ensure_installed(name)?;
        let unit = Self::unit_name(name)?;

        self.systemctl(&["disable", "--now", &unit])?;
        fs::remove_file(&path).map_err(|source| ServiceControlError::UnitRemovalFailure {
            path: path.clone(),
            source,
        })?;
        info!("removed the unit file at {}", path.display());

        self.systemctl(&["daemon-reload"])?;
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), ServiceControlError> {
        self.ensure_installed(name)?;
        self.systemctl(&["start", &Self::unit_name(name)?]).map(|_| ())
    }

    fn stop(&self, name: &str) -> Result<(), ServiceControlError> {
        self.ensure_installed(name)?;
        self.systemctl(&["stop", &Self::unit_name(name)?]).map(|_| ())
    }

    fn restart(&self, name: &str) -> Result<(), ServiceControlError> {
        self.ensure_installed(name)?;
        self.systemctl(&["restart", &Self::unit_name(name)?]).map(|_| ())
    }

    fn status(&self, name: &str) -> Result<String, ServiceControlError> {
        self.ensure_installed(name)?;
        let unit = Self::unit_name(name)?;
        let args = ["is-active", unit.as_str()];

        // `is-active` reports inactive units through a non-zero exit code
        let output = self.execute(&args)?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if state.is_empty() {
            return Err(ServiceControlError::CommandFailure {
                command: self.command_string(&args),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(state)
    }

    fn request_stop(&self, name: &str) -> Result<(), ServiceControlError> {
        self.systemctl(&["stop", "--no-block", &Self::unit_name(name)?])
            .map(|_| ())
    }
}
