//! Top-level error type shared across the engine's components.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::copier::CopyError;
use crate::resolver::ResolveError;
use crate::watcher::WatchError;
use relay_walk::ScanError;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by engine operations.
///
/// Per-file failures normally end up in the error aggregator rather than
/// here; an `EngineError` return from an orchestrator entry point means the
/// whole operation stopped (source scan failure, cancellation, timeout, or a
/// configuration problem).
#[derive(Debug, Error)]
pub enum EngineError {
    /// A tree scan failed.
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
    /// A file copy failed.
    #[error(transparent)]
    Copy(#[from] CopyError),
    /// Conflict resolution failed for one path.
    #[error("conflict resolution failed for '{path}': {source}")]
    Resolve {
        /// Path whose conflict could not be resolved.
        path: PathBuf,
        /// Underlying resolver failure.
        #[source]
        source: ResolveError,
    },
    /// Taking a pre-overwrite backup failed.
    #[error("backup failed for '{path}': {source}")]
    Backup {
        /// Destination path that was about to be overwritten.
        path: PathBuf,
        /// Underlying copy failure.
        #[source]
        source: CopyError,
    },
    /// A filesystem operation outside the copier failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
    /// The operation exceeded its wall-clock deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// The configuration record is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A scanned entry did not live under the scanned root.
    #[error("entry '{path}' lies outside the source root '{root}'")]
    OutsideRoot {
        /// The offending entry.
        path: PathBuf,
        /// The root it was expected beneath.
        root: PathBuf,
    },
    /// An operation kept failing until the retry budget ran out.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Label of the retried operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's error.
        #[source]
        source: Box<EngineError>,
    },
    /// The filesystem watcher failed.
    #[error("watch failed: {0}")]
    Watch(#[from] WatchError),
    /// A dispatched worker task failed to run to completion.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Creates an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Reports whether this error (or the failure it wraps) is a
    /// cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::Timeout(_) => true,
            Self::Scan(ScanError::Cancelled) => true,
            Self::Copy(CopyError::Cancelled(_)) => true,
            Self::Backup { source, .. } => matches!(source, CopyError::Cancelled(_)),
            Self::RetriesExhausted { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}
