//! Error type returned by tree scans.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that terminate a scan.
///
/// Per-entry metadata failures are not represented here; the scanner drops
/// such entries and keeps going. Only root inspection, directory reads,
/// cancellation, and worker failures abort a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scan root could not be inspected.
    #[error("failed to inspect scan root '{path}': {source}")]
    Root {
        /// Path of the root that failed.
        path: PathBuf,
        /// Underlying error from the operating system.
        #[source]
        source: io::Error,
    },
    /// A directory's contents could not be read.
    #[error("failed to read directory '{path}': {source}")]
    ReadDir {
        /// Directory whose contents could not be read.
        path: PathBuf,
        /// Underlying error from the operating system.
        #[source]
        source: io::Error,
    },
    /// The scan was cancelled before completion.
    #[error("scan cancelled")]
    Cancelled,
    /// A scan worker task failed to run to completion.
    #[error("scan worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ScanError {
    /// Reports whether the failure was the scan root not existing, the one
    /// scan failure the orchestrator tolerates for destination trees.
    #[must_use]
    pub fn is_root_not_found(&self) -> bool {
        matches!(
            self,
            Self::Root { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_not_found_is_detected() {
        let error = ScanError::Root {
            path: PathBuf::from("/missing"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(error.is_root_not_found());
    }

    #[test]
    fn other_root_errors_are_not_not_found() {
        let error = ScanError::Root {
            path: PathBuf::from("/denied"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!error.is_root_not_found());
        assert!(!ScanError::Cancelled.is_root_not_found());
    }
}
