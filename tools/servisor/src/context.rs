// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::ServisorError;
use std::env;
use std::path::{Path, PathBuf};

/// Process-wide facts established once at startup and passed explicitly
/// to everything that needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RuntimeContext {
    /// Absolute path of the running servisor binary.
    executable: PathBuf,

    /// Path of the configuration file in use.
    config_path: PathBuf,
}

impl RuntimeContext {
    pub(crate) fn new(executable: PathBuf, config_path: PathBuf) -> Self {
        RuntimeContext {
            executable,
            config_path,
        }
    }

    /// Builds the context for the current process, falling back to `<binary stem>.json`
    /// next to the binary when no explicit config path was given.
    pub(crate) fn for_current_process(
        config_path: Option<PathBuf>,
    ) -> Result<Self, ServisorError> {
        let executable = env::current_exe()
            .and_then(std::path::absolute)
            .map_err(|source| ServisorError::OwnExecutableUnknown { source })?;

        let config_path = match config_path {
            Some(path) => std::path::absolute(&path).unwrap_or(path),
            None => default_config_path(&executable),
        };

        Ok(RuntimeContext::new(executable, config_path))
    }

    pub(crate) fn executable(&self) -> &Path {
        &self.executable
    }

    /// Directory containing the servisor binary.
    pub(crate) fn executable_dir(&self) -> &Path {
        self.executable.parent().unwrap_or_else(|| Path::new("/"))
    }

    pub(crate) fn config_path(&self) -> &Path {
        &self.config_path
    }
}

pub(crate) fn default_config_path(executable: &Path) -> PathBuf {
    let stem = executable
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    let dir = executable.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{stem}.json"))
}
