// Copyright 2023 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use sha2::Digest;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::{fs, io};
use tracing::trace;

pub(crate) fn init_parent_dir<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let Some(parent) = path.as_ref().parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    trace!("initialising {}", parent.display());
    fs::create_dir_all(parent)
}

pub(crate) fn calculate_file_checksum<D: Digest, P: AsRef<Path>>(
    filepath: P,
) -> Result<Vec<u8>, io::Error> {
    let file = File::open(filepath)?;
    let mut reader = BufReader::new(file);

    let mut hasher = D::new();
    let mut buf = vec![0; 4096];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n])
    }

    Ok(hasher.finalize().to_vec())
}

pub(crate) fn to_hex_string<T: AsRef<[u8]>>(input: T) -> String {
    hex::encode(input)
}

/// Checks whether the path points to a regular file the current user could execute.
pub(crate) fn is_executable<P: AsRef<Path>>(path: P) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(unix)]
pub(crate) fn make_executable<P: AsRef<Path>>(path: P) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub(crate) fn make_executable<P: AsRef<Path>>(_path: P) -> io::Result<()> {
    Ok(())
}
