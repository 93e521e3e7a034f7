// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::{LogRotation, OutputTarget, ServiceConfig};
use crate::error::SupervisorError;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub(crate) mod rotating;

pub(crate) use rotating::RotatingFileWriter;

pub(crate) const PROC_START_MARKER: &str = "----- proc start -----";
pub(crate) const PROC_END_MARKER: &str = "----- proc end -----";

#[derive(Debug)]
struct SinkWriter {
    writer: RotatingFileWriter,

    /// Whether the last byte written wasn't a newline.
    mid_line: bool,
}

/// Shared handle to a single rotating output file.
#[derive(Debug, Clone)]
pub(crate) struct LogSink {
    inner: Arc<Mutex<SinkWriter>>,
}

impl LogSink {
    pub(crate) fn open(path: &Path, rotation: LogRotation) -> Result<Self, SupervisorError> {
        let writer = RotatingFileWriter::open(path, rotation).map_err(|source| {
            SupervisorError::SinkOpenFailure {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(LogSink {
            inner: Arc::new(Mutex::new(SinkWriter {
                writer,
                mid_line: false,
            })),
        })
    }

    /// Writes the raw chunk exactly as received.
    pub(crate) fn write_all(&self, chunk: &[u8]) -> io::Result<()> {
        let Some(&last) = chunk.last() else {
            return Ok(());
        };

        let mut inner = self.inner.lock();
        inner.writer.write_all(chunk)?;
        inner.mid_line = last != b'\n';
        Ok(())
    }

    /// Writes a line of its own, terminating it with a newline if it's missing one.
    /// If the preceding output ended mid-line, the line is moved onto a fresh one.
    pub(crate) fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.mid_line {
            inner.writer.write_all(b"\n")?;
            inner.mid_line = false;
        }
        inner.writer.write_all(line)?;
        if !line.ends_with(b"\n") {
            inner.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        self.inner.lock().writer.flush()
    }

    pub(crate) fn is_same_sink(&self, other: &LogSink) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Output destinations owned by a single execution attempt.
#[derive(Debug)]
pub(crate) struct AttemptSinks {
    stdout: Option<LogSink>,
    stderr: Option<LogSink>,
}

impl AttemptSinks {
    pub(crate) fn open(config: &ServiceConfig) -> Result<Self, SupervisorError> {
        let rotation = &config.log_rotation;

        let stdout = match config.stdout_target() {
            OutputTarget::File(path) => Some(LogSink::open(&path, rotation.clone())?),
            // rejected when loading the config
            OutputTarget::SameAsStdout | OutputTarget::Discard => None,
        };

        let stderr = match config.stderr_target() {
            OutputTarget::Discard => None,
            OutputTarget::SameAsStdout => stdout.clone(),
            OutputTarget::File(path) => Some(LogSink::open(&path, rotation.clone())?),
        };

        Ok(AttemptSinks { stdout, stderr })
    }

    pub(crate) fn stdout(&self) -> Option<&LogSink> {
        self.stdout.as_ref()
    }

    pub(crate) fn stderr(&self) -> Option<&LogSink> {
        self.stderr.as_ref()
    }

    /// Every underlying sink exactly once.
    pub(crate) fn distinct(&self) -> impl Iterator<Item = &LogSink> {
        let stderr = match (&self.stdout, &self.stderr) {
            (Some(stdout), Some(stderr)) if stdout.is_same_sink(stderr) => None,
            (_, stderr) => stderr.as_ref(),
        };
        self.stdout.iter().chain(stderr)
    }

    pub(crate) fn write_marker(&self, marker: &str) {
        for sink in self.distinct() {
            if let Err(err) = sink.write_line(marker.as_bytes()) {
                warn!("failed to write '{marker}' into the output sink: {err}")
            }
        }
    }

    /// Flushes and releases the sinks.
    pub(crate) fn close(self) {
        for sink in self.distinct() {
            if let Err(err) = sink.flush() {
                warn!("failed to flush the output sink: {err}")
            }
        }
    }
}
