//! File system helpers for the vault-search data directory.
//!
//! Everything the tool writes (config, snapshot, change tracking, pid file,
//! log) lives under one data directory that only the owner may read.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use crate::error::Result;

/// Permission bits for directories we create.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Permission bits for files and sockets we create.
#[cfg(unix)]
pub const FILE_MODE: u32 = 0o600;

/// Create `path` (and parents) with mode 0700, or tighten an existing
/// directory back to 0700.
pub fn ensure_secure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }

    #[cfg(unix)]
    {
        let mode = fs::metadata(path)?.permissions().mode() & 0o777;
        if mode != DIR_MODE {
            fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))?;
        }
    }

    Ok(())
}

/// Write `bytes` to `path` through a uniquely named sibling and a rename, so
/// readers never observe a half-written file and concurrent writers never
/// share a temporary.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    #[cfg(unix)]
    fs::set_permissions(file.path(), fs::Permissions::from_mode(FILE_MODE))?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Open `path` for appending, creating it owner-only if missing.
pub fn open_private_append(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    Ok(options.open(path)?)
}

/// Restrict an existing file (or socket) to the owner.
pub fn restrict_to_owner(path: &Path) -> Result<()> {
    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))?;
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
