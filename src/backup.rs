//! Snapshot-before-mutate and copy-back-on-failure.
//!
//! A snapshot is a byte-identical sibling copy of the target file that also
//! keeps the original modification time, so a restored file does not look
//! newer than it is to a build system. Both directions are checked with an
//! xxh3 digest of the original bytes.

use filetime::FileTime;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// A snapshot on disk. Left in place after a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    /// xxh3 of the snapshotted bytes
    pub digest: u64,
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to carry modification time over to {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copy at {path} does not match the snapshotted content")]
    DigestMismatch { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupManager {
    suffix: String,
}

impl Default for BackupManager {
    fn default() -> Self {
        Self {
            suffix: ".backup".to_string(),
        }
    }
}

impl BackupManager {
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// `<file><suffix>` in the same directory.
    pub fn backup_path(&self, path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(&self.suffix);
        PathBuf::from(name)
    }

    /// Copy `path` to its backup location. An existing backup is replaced.
    pub fn snapshot(&self, path: &Path) -> Result<BackupRecord, BackupError> {
        let backup_path = self.backup_path(path);

        let original = fs::read(path).map_err(|source| BackupError::Copy {
            from: path.to_path_buf(),
            to: backup_path.clone(),
            source,
        })?;
        let digest = xxh3_64(&original);

        copy_with_mtime(path, &backup_path)?;
        check_digest(&backup_path, digest, path)?;

        info!(backup = %backup_path.display(), "created backup");
        Ok(BackupRecord {
            original_path: path.to_path_buf(),
            backup_path,
            digest,
        })
    }

    /// Copy the backup back over the original.
    pub fn restore(&self, record: &BackupRecord) -> Result<(), BackupError> {
        warn!(
            original = %record.original_path.display(),
            backup = %record.backup_path.display(),
            "restoring original from backup"
        );
        copy_with_mtime(&record.backup_path, &record.original_path)?;
        check_digest(&record.original_path, record.digest, &record.backup_path)
    }
}

fn copy_with_mtime(from: &Path, to: &Path) -> Result<(), BackupError> {
    fs::copy(from, to).map_err(|source| BackupError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;

    let mtime = fs::metadata(from)
        .map(|meta| FileTime::from_last_modification_time(&meta))
        .map_err(|source| BackupError::Metadata {
            path: to.to_path_buf(),
            source,
        })?;
    filetime::set_file_mtime(to, mtime).map_err(|source| BackupError::Metadata {
        path: to.to_path_buf(),
        source,
    })
}

fn check_digest(path: &Path, expected: u64, from: &Path) -> Result<(), BackupError> {
    let copied = fs::read(path).map_err(|source| BackupError::Copy {
        from: from.to_path_buf(),
        to: path.to_path_buf(),
        source,
    })?;
    if xxh3_64(&copied) != expected {
        return Err(BackupError::DigestMismatch {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
