// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use crate::service_manager::validate_service_name;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Value of `stderr` that makes it share the stdout destination.
pub(crate) const STDOUT_ALIAS: &str = "&stdout";

pub(crate) const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub(crate) const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub(crate) const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub(crate) const DEFAULT_OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) const DEFAULT_LOG_MAX_SIZE: u64 = 10 * 1024 * 1024;
pub(crate) const DEFAULT_LOG_MAX_BACKUPS: usize = 5;

/// Where one of the child's standard streams should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputTarget {
    Discard,
    File(PathBuf),
    SameAsStdout,
}

/// The service definition. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ServiceConfig {
    pub(crate) name: String,
    pub(crate) display_name: String,
    pub(crate) description: String,

    /// Working directory of the child. Empty means the supervisor's own working directory.
    pub(crate) dir: PathBuf,

    /// Reference to the supervised executable: an absolute path, a path relative
    /// to the supervisor or working directory, or a command name on the search path.
    pub(crate) exec: String,
    pub(crate) args: Vec<String>,

    /// Additional `KEY=VALUE` entries appended to the inherited environment.
    pub(crate) env: Vec<String>,

    /// Empty to discard, otherwise a file path.
    pub(crate) stdout: String,

    /// Empty to discard, a file path or `&stdout`.
    pub(crate) stderr: String,

    pub(crate) update: UpdateOptions,
    pub(crate) log_rotation: LogRotation,
    pub(crate) debug: DebugConfig,
}

/// Options of the updater. The supervisor itself only cares whether an endpoint is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct UpdateOptions {
    pub(crate) base_url: String,

    /// Where the downloaded executable gets installed. Defaults to `dir/exec`.
    pub(crate) install_path: Option<PathBuf>,

    /// Reject artifacts published without a checksum.
    pub(crate) require_checksum: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            base_url: String::new(),
            install_path: None,
            require_checksum: true,
        }
    }
}

impl UpdateOptions {
    pub(crate) fn has_endpoint(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LogRotation {
    /// Size in bytes after which the file gets rotated. 0 disables size based rotation.
    pub(crate) max_size: u64,

    /// Number of rotated files to keep around.
    pub(crate) max_backups: usize,

    /// Rotated files older than this get removed.
    #[serde(with = "humantime_serde")]
    pub(crate) max_age: Option<Duration>,
}

impl Default for LogRotation {
    fn default() -> Self {
        LogRotation {
            max_size: DEFAULT_LOG_MAX_SIZE,
            max_backups: DEFAULT_LOG_MAX_BACKUPS,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct DebugConfig {
    /// Wait between the end of one attempt and the start of the next one.
    #[serde(with = "humantime_serde")]
    pub(crate) idle_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub(crate) update_poll_interval: Duration,

    /// How long the child gets to exit after being interrupted before it gets killed.
    #[serde(with = "humantime_serde")]
    pub(crate) graceful_shutdown_timeout: Duration,

    /// How long to wait for the OS to confirm a killed child is gone before abandoning it.
    #[serde(with = "humantime_serde")]
    pub(crate) kill_timeout: Duration,

    /// How long the output pumps may keep draining the child's pipes once it has exited.
    #[serde(with = "humantime_serde")]
    pub(crate) output_drain_timeout: Duration,

    /// Disables servisor's own logs (but not the output of the child).
    pub(crate) disable_logs: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            idle_interval: DEFAULT_IDLE_INTERVAL,
            update_poll_interval: DEFAULT_UPDATE_POLL_INTERVAL,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            output_drain_timeout: DEFAULT_OUTPUT_DRAIN_TIMEOUT,
            disable_logs: false,
        }
    }
}

impl ServiceConfig {
    pub(crate) fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("attempting to load configuration file from {}", path.display());

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::LoadFailure {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    pub(crate) fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: ServiceConfig =
            serde_json::from_str(raw).map_err(|source| ConfigError::ParseFailure {
                path: path.to_path_buf(),
                source,
            })?;

        config
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                path: path.to_path_buf(),
                reason,
            })?;

        if config.display_name.is_empty() {
            config.display_name = config.name.clone();
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        validate_service_name(&self.name).map_err(|reason| format!("'name': {reason}"))?;

        if self.exec.trim().is_empty() {
            return Err("'exec' must not be empty".into());
        }
        if self.stdout == STDOUT_ALIAS {
            return Err(format!("'{STDOUT_ALIAS}' is only valid for 'stderr'"));
        }
        if let Some(entry) = self.env.iter().find(|entry| !is_valid_env_entry(entry)) {
            return Err(format!("'{entry}' is not a valid KEY=VALUE environment entry"));
        }
        Ok(())
    }

    pub(crate) fn working_dir(&self) -> Option<&Path> {
        if self.dir.as_os_str().is_empty() {
            None
        } else {
            Some(&self.dir)
        }
    }

    /// Configured environment entries split into their key and value.
    pub(crate) fn env_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|entry| entry.split_once('='))
    }

    pub(crate) fn stdout_target(&self) -> OutputTarget {
        self.output_target(&self.stdout)
    }

    pub(crate) fn stderr_target(&self) -> OutputTarget {
        if self.stderr == STDOUT_ALIAS {
            OutputTarget::SameAsStdout
        } else {
            self.output_target(&self.stderr)
        }
    }

    fn output_target(&self, raw: &str) -> OutputTarget {
        if raw.is_empty() {
            return OutputTarget::Discard;
        }
        let path = Path::new(raw);
        match self.working_dir() {
            Some(dir) if path.is_relative() => OutputTarget::File(dir.join(path)),
            _ => OutputTarget::File(path.to_path_buf()),
        }
    }

    /// Where the updater installs new versions of the executable.
    pub(crate) fn install_path(&self) -> PathBuf {
        if let Some(install_path) = &self.update.install_path {
            return install_path.clone();
        }
        let exec = Path::new(&self.exec);
        match self.working_dir() {
            Some(dir) if exec.is_relative() => dir.join(exec),
            _ => exec.to_path_buf(),
        }
    }
}

fn is_valid_env_entry(entry: &str) -> bool {
    matches!(entry.split_once('='), Some((key, _)) if !key.is_empty())
}
