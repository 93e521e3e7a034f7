// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// sysexits.h
const EX_UNAVAILABLE: u8 = 69;
const EX_CONFIG: u8 = 78;

#[derive(Debug, Error)]
pub(crate) enum ServisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    ServiceControl(#[from] ServiceControlError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("failed to determine the location of the servisor executable: {source}")]
    OwnExecutableUnknown {
        #[source]
        source: io::Error,
    },

    #[error("failed to create the tokio runtime: {source}")]
    RuntimeCreationFailure {
        #[source]
        source: io::Error,
    },

    #[error("failed to listen for the shutdown signals: {source}")]
    SignalListenerFailure {
        #[source]
        source: io::Error,
    },

    #[error("the supervisor has stopped itself after an unrecoverable fault")]
    FaultedShutdown,
}

impl ServisorError {
    /// Process exit code associated with this error.
    pub(crate) fn exit_code(&self) -> ExitCode {
        match self {
            ServisorError::Config(_) => ExitCode::from(EX_CONFIG),
            ServisorError::ServiceControl(ServiceControlError::Unsupported { .. }) => {
                ExitCode::from(EX_UNAVAILABLE)
            }
            _ => ExitCode::FAILURE,
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to load config file using path '{}'. detailed message: {source}", path.display())]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file at '{}': {source}", path.display())]
    ParseFailure {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("the config file at '{}' is invalid: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub(crate) enum SupervisorError {
    #[error("the supervisor is already running")]
    AlreadyRunning,

    #[error("the supervisor is not running")]
    NotRunning,

    #[error("could not find executable '{executable}' and no update could provide it")]
    ExecutableNotFound { executable: String },

    #[error("failed to spawn '{}': {source}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open the output sink at '{}': {source}", path.display())]
    SinkOpenFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("the update check has failed: {source}")]
    UpdateCheckFailed {
        #[source]
        source: UpdateError,
    },

    #[error("process {pid} did not exit within {} after {stage}", humantime::format_duration(*timeout))]
    TerminationTimedOut {
        pid: u32,
        stage: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug, Error)]
pub(crate) enum UpdateError {
    #[error("failed to build the http client: {source}")]
    HttpClientFailure {
        #[source]
        source: reqwest::Error,
    },

    #[error("'{raw}' is not a valid update endpoint: {source}")]
    MalformedEndpoint {
        raw: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to retrieve update information from {url}: {source}")]
    ManifestRetrievalFailure {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to download the update artifact from {url}: {source}")]
    DownloadFailure {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("version {version} does not provide a download url for {arch}")]
    NoDownloadUrl { version: String, arch: String },

    #[error("version {version} does not specify an artifact checksum while checksums are required")]
    MissingChecksum { version: String },

    #[error("the checksum of the artifact at '{}' does not match. expected: {expected}, got: {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("failed to write the artifact to '{}': {source}", path.display())]
    ArtifactWriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to install the artifact at '{}': {source}", path.display())]
    InstallFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read the version information at '{}': {source}", path.display())]
    VersionInfoLoadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("the version information at '{}' is malformed: {source}", path.display())]
    MalformedVersionInfo {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to save the version information at '{}': {source}", path.display())]
    VersionInfoSaveFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub(crate) enum ServiceControlError {
    #[error("'{name}' is not a valid service name: {reason}")]
    InvalidServiceName { name: String, reason: &'static str },

    #[error("service management is not supported on {platform}")]
    Unsupported { platform: &'static str },

    #[error("failed to write the unit file at '{}': {source}", path.display())]
    UnitWriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove the unit file at '{}': {source}", path.display())]
    UnitRemovalFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("service '{name}' is not installed")]
    NotInstalled { name: String },

    #[error("failed to execute `{command}`: {source}")]
    CommandExecutionFailure {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` has failed with {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}
