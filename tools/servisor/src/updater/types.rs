// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::UpdateError;
use crate::helpers::init_parent_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use time::OffsetDateTime;
use url::Url;

/// Published description of the latest available version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UpdateManifest {
    pub(crate) version: String,

    #[serde(default)]
    pub(crate) notes: String,

    /// Artifacts keyed by `<os>-<arch>`.
    pub(crate) platforms: HashMap<String, PlatformArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PlatformArtifact {
    pub(crate) url: Url,

    /// Hex encoded sha256 of the artifact.
    #[serde(default)]
    pub(crate) checksum: Option<String>,
}

impl UpdateManifest {
    pub(crate) fn artifact_for(&self, arch: &str) -> Result<&PlatformArtifact, UpdateError> {
        self.platforms
            .get(arch)
            .ok_or_else(|| UpdateError::NoDownloadUrl {
                version: self.version.clone(),
                arch: arch.to_string(),
            })
    }
}

/// Record of the version that was most recently installed by the updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CurrentVersionInfo {
    pub(crate) version: String,

    #[serde(with = "time::serde::rfc3339")]
    pub(crate) installed_at: OffsetDateTime,

    pub(crate) source: Url,
}

impl CurrentVersionInfo {
    /// Loads the version information, returning `None` if nothing has been installed yet.
    pub(crate) fn try_load<P: AsRef<Path>>(path: P) -> Result<Option<Self>, UpdateError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(UpdateError::VersionInfoLoadFailure {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| UpdateError::MalformedVersionInfo {
                path: path.to_path_buf(),
                source,
            })
    }

    pub(crate) fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), UpdateError> {
        let path = path.as_ref();
        let save_failure = |source| UpdateError::VersionInfoSaveFailure {
            path: path.to_path_buf(),
            source,
        };

        init_parent_dir(path).map_err(save_failure)?;
        let raw = serde_json::to_string_pretty(self).map_err(io::Error::from).map_err(save_failure)?;
        fs::write(path, raw).map_err(save_failure)
    }
}
