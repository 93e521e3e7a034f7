// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServiceConfig;
use crate::error::UpdateError;
use crate::helpers::{calculate_file_checksum, init_parent_dir, make_executable, to_hex_string};
use crate::updater::types::{CurrentVersionInfo, PlatformArtifact, UpdateManifest};
use crate::updater::Updater;
use async_trait::async_trait;
use futures::StreamExt;
use sha2::Sha256;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

const MANIFEST_FILE: &str = "update-info.json";
const STATE_DIR: &str = ".servisor";
const VERSION_FILE: &str = "current-version.json";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const LOGGING_RATE: Duration = Duration::from_secs(5);

/// Updater pulling new versions of the executable from a static http endpoint.
pub(crate) struct HttpUpdater {
    client: reqwest::Client,
    manifest_url: Url,
    install_path: PathBuf,
    version_file: PathBuf,
    require_checksum: bool,
}

fn manifest_url(base_url: &str, name: &str) -> Result<Url, UpdateError> {
    let raw = base_url.trim();
    let malformed = |source| UpdateError::MalformedEndpoint {
        raw: raw.to_string(),
        source,
    };

    if raw.ends_with(".json") {
        return raw.parse().map_err(malformed);
    }
    let base: Url = format!("{}/", raw.trim_end_matches('/'))
        .parse()
        .map_err(malformed)?;
    base.join(&format!("{name}/{MANIFEST_FILE}")).map_err(malformed)
}

fn version_file(config: &ServiceConfig, install_path: &Path) -> PathBuf {
    let base = match config.working_dir() {
        Some(dir) => dir.to_path_buf(),
        None => install_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    base.join(STATE_DIR).join(VERSION_FILE)
}

fn download_path(install_path: &Path) -> PathBuf {
    let mut raw = OsString::from(install_path.as_os_str());
    raw.push(".download");
    PathBuf::from(raw)
}

fn verify_checksum(path: &Path, expected: &str) -> Result<(), UpdateError> {
    let actual = calculate_file_checksum::<Sha256, _>(path)
        .map(to_hex_string)
        .map_err(|source| UpdateError::ArtifactWriteFailure {
            path: path.to_path_buf(),
            source,
        })?;

    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(UpdateError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Marks the downloaded artifact as executable and moves it in place of the old one.
fn install_artifact(downloaded: &Path, install_path: &Path) -> Result<(), UpdateError> {
    let install_failure = |source| UpdateError::InstallFailure {
        path: install_path.to_path_buf(),
        source,
    };

    make_executable(downloaded).map_err(install_failure)?;
    fs::rename(downloaded, install_path).map_err(install_failure)
}

impl HttpUpdater {
    pub(crate) fn new(config: &ServiceConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| UpdateError::HttpClientFailure { source })?;

        let install_path = config.install_path();
        Ok(HttpUpdater {
            client,
            manifest_url: manifest_url(&config.update.base_url, &config.name)?,
            version_file: version_file(config, &install_path),
            install_path,
            require_checksum: config.update.require_checksum,
        })
    }

    async fn fetch_manifest(&self) -> Result<UpdateManifest, UpdateError> {
        let retrieval_failure = |source| UpdateError::ManifestRetrievalFailure {
            url: self.manifest_url.clone(),
            source,
        };

        self.client
            .get(self.manifest_url.clone())
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(retrieval_failure)?
            .json()
            .await
            .map_err(retrieval_failure)
    }

    async fn download(&self, artifact: &PlatformArtifact, target: &Path) -> Result<(), UpdateError> {
        let write_failure = |source| UpdateError::ArtifactWriteFailure {
            path: target.to_path_buf(),
            source,
        };
        let download_failure = |source| UpdateError::DownloadFailure {
            url: artifact.url.clone(),
            source,
        };

        let response = self
            .client
            .get(artifact.url.clone())
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(download_failure)?;

        let maybe_length = response.content_length();
        let mut source = response.bytes_stream();

        init_parent_dir(target).map_err(write_failure)?;
        let mut out = tokio::fs::File::create(target)
            .await
            .map_err(write_failure)?;

        info!("downloading {}", artifact.url);
        let mut downloaded = 0u64;
        let mut last_logged = tokio::time::Instant::now();
        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(download_failure)?;
            out.write_all(&chunk).await.map_err(write_failure)?;
            downloaded += chunk.len() as u64;

            if last_logged.elapsed() > LOGGING_RATE {
                match maybe_length {
                    Some(length) => info!("downloaded {downloaded}/{length} bytes"),
                    None => info!("downloaded {downloaded} bytes"),
                }
                last_logged = tokio::time::Instant::now();
            }
        }
        out.flush().await.map_err(write_failure)?;
        debug!("finished the download of {downloaded} bytes");

        Ok(())
    }

    async fn install(&self, manifest: &UpdateManifest) -> Result<(), UpdateError> {
        let arch = self.arch();
        let artifact = manifest.artifact_for(&arch)?;
        if artifact.checksum.is_none() && self.require_checksum {
            return Err(UpdateError::MissingChecksum {
                version: manifest.version.clone(),
            });
        }

        let downloaded = download_path(&self.install_path);
        let res = self.download(artifact, &downloaded).await.and_then(|_| {
            match &artifact.checksum {
                Some(expected) => verify_checksum(&downloaded, expected),
                None => {
                    warn!("version {} has been published without a checksum", manifest.version);
                    Ok(())
                }
            }
        });
        let res = res.and_then(|_| install_artifact(&downloaded, &self.install_path));

        if res.is_err() {
            // best effort: do not leave partial artifacts lying around
            let _ = fs::remove_file(&downloaded);
            return res;
        }

        CurrentVersionInfo {
            version: manifest.version.clone(),
            installed_at: OffsetDateTime::now_utc(),
            source: artifact.url.clone(),
        }
        .save(&self.version_file)
    }
}

#[async_trait]
impl Updater for HttpUpdater {
    async fn do_update(&self) -> Result<bool, UpdateError> {
        debug!("checking {} for updates", self.manifest_url);
        let manifest = self.fetch_manifest().await?;

        let current = CurrentVersionInfo::try_load(&self.version_file)?.map(|info| info.version);
        if current.as_deref() == Some(manifest.version.as_str()) {
            debug!("version {} is already installed", manifest.version);
            return Ok(false);
        }

        info!(
            "installing version {} (currently installed: {})",
            manifest.version,
            current.as_deref().unwrap_or("unknown")
        );
        if !manifest.notes.is_empty() {
            info!("release notes: {}", manifest.notes);
        }

        self.install(&manifest).await?;
        info!(
            "version {} has been installed at {}",
            manifest.version,
            self.install_path.display()
        );
        Ok(true)
    }

    fn current_version(&self) -> Option<String> {
        match CurrentVersionInfo::try_load(&self.version_file) {
            Ok(info) => info.map(|info| info.version),
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }
}
