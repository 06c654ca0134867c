//! Metadata snapshot of a single filesystem entry.

use std::fs::Metadata;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use relay_checksums::DigestAlgorithm;

/// Snapshot of one filesystem entry observed during a scan.
///
/// Records are plain data: the scanner fills them in, the orchestrator diffs
/// them, and nothing in between holds a file handle.
#[derive(Clone, Debug)]
pub struct FileRecord {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Size in bytes. Zero for directories on most filesystems.
    pub size: u64,
    /// Modification time at the filesystem's resolution.
    pub modified: SystemTime,
    /// Permission bits (the low nine bits on Unix).
    pub mode: u32,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Content digest of a regular file, when one was computed.
    pub digest: Option<String>,
    /// Algorithm that produced [`digest`](Self::digest).
    pub digest_algo: Option<DigestAlgorithm>,
}

impl FileRecord {
    /// Builds a record from freshly queried metadata. The digest fields start
    /// empty; the scanner fills them in for regular files.
    #[must_use]
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            mode: mode_bits(metadata),
            is_dir: metadata.is_dir(),
            digest: None,
            digest_algo: None,
            path,
        }
    }

    /// Reports whether the entry is a regular (non-directory) entry.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        !self.is_dir
    }

    /// Modification time as whole seconds since the Unix epoch, the
    /// resolution used for digest cache validation.
    #[must_use]
    pub fn mtime_seconds(&self) -> i64 {
        unix_seconds(self.modified)
    }
}

/// Converts a [`SystemTime`] to whole seconds since the Unix epoch.
///
/// Times before the epoch map to negative values.
#[must_use]
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs() as i64,
        Err(error) => -(error.duration().as_secs() as i64),
    }
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
