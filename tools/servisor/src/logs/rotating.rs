// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::config::LogRotation;
use crate::helpers::init_parent_dir;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Append-only file writer that rotates `file -> file.1 -> file.2 ...` once it grows past
/// the configured size, keeping a bounded number of backups.
#[derive(Debug)]
pub(crate) struct RotatingFileWriter {
    path: PathBuf,
    file: File,
    written: u64,
    policy: LogRotation,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(format!(".{index}"));
    PathBuf::from(raw)
}

fn rename_if_exists(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl RotatingFileWriter {
    pub(crate) fn open<P: AsRef<Path>>(path: P, policy: LogRotation) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        init_parent_dir(&path)?;

        let file = open_append(&path)?;
        let written = file.metadata()?.len();

        let writer = RotatingFileWriter {
            path,
            file,
            written,
            policy,
        };
        writer.remove_expired_backups();
        Ok(writer)
    }

    fn should_rotate(&self, incoming: usize) -> bool {
        self.policy.max_size > 0
            && self.written > 0
            && self.written.saturating_add(incoming as u64) > self.policy.max_size
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        debug!("rotating {}", self.path.display());

        if self.policy.max_backups == 0 {
            self.file.set_len(0)?;
        } else {
            // the oldest backup gets overwritten by the rename chain
            for index in (1..self.policy.max_backups).rev() {
                rename_if_exists(
                    &backup_path(&self.path, index),
                    &backup_path(&self.path, index + 1),
                )?;
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
            self.file = open_append(&self.path)?;
        }

        self.written = 0;
        self.remove_expired_backups();
        Ok(())
    }

    fn remove_expired_backups(&self) {
        let Some(max_age) = self.policy.max_age else {
            return;
        };
        let now = SystemTime::now();

        for index in 1..=self.policy.max_backups {
            let backup = backup_path(&self.path, index);
            let Ok(modified) = fs::metadata(&backup).and_then(|meta| meta.modified()) else {
                continue;
            };
            let expired = now
                .duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false);

            if expired {
                if let Err(err) = fs::remove_file(&backup) {
                    warn!("failed to remove expired log {}: {err}", backup.display())
                }
            }
        }
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rotate(buf.len()) {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
