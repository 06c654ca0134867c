//! Error classification and the bounded error aggregator.
//!
//! Every per-file failure in the engine is classified into a category with a
//! recovery suggestion and collected in an [`ErrorLog`]. Classification
//! prefers structured information from the operating system (error kinds and
//! raw `errno` values) and only falls back to substring matching on rendered
//! messages when nothing structured is available.

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::copier::CopyError;
use crate::error::EngineError;
use relay_walk::ScanError;

/// Default bound on the number of retained errors.
pub const DEFAULT_ERROR_CAPACITY: usize = 1000;

/// Category assigned to every classified error.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCategory {
    /// Nothing more specific applies.
    Unknown,
    /// Connectivity-shaped failures (timeouts, refused or reset peers).
    Network,
    /// The operating system denied access.
    Permission,
    /// The destination device is out of space.
    Disk,
    /// Data failed an integrity check.
    Corruption,
    /// The configuration record is unusable.
    Configuration,
    /// The operation was cancelled or timed out.
    Cancellation,
}

impl ErrorCategory {
    /// A recovery suggestion tied to the category.
    #[must_use]
    pub const fn suggestion(self) -> &'static str {
        match self {
            Self::Unknown => "Check logs for more details and try again",
            Self::Network => "Check network connectivity and try again",
            Self::Permission => "Check file permissions or run with elevated privileges",
            Self::Disk => "Free up disk space and try again",
            Self::Corruption => "Verify file integrity and restore from backup if necessary",
            Self::Configuration => "Check configuration file syntax and settings",
            Self::Cancellation => "Operation was cancelled by user or timeout",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Network => "Network",
            Self::Permission => "Permission",
            Self::Disk => "Disk",
            Self::Corruption => "Corruption",
            Self::Configuration => "Configuration",
            Self::Cancellation => "Cancellation",
        };
        f.write_str(name)
    }
}

/// A classified per-file error as stored in the aggregator.
#[derive(Clone, Debug)]
pub struct SyncError {
    /// Failure category.
    pub category: ErrorCategory,
    /// Label of the operation that failed (`"copy"`, `"delete"`, ...).
    pub operation: String,
    /// Path the operation was acting on.
    pub path: PathBuf,
    /// Rendered message of the underlying failure.
    pub message: String,
    /// The underlying engine error, when retained.
    pub underlying: Option<Arc<EngineError>>,
    /// When the error was recorded.
    pub timestamp: SystemTime,
    /// Whether retrying could plausibly succeed.
    pub recoverable: bool,
    /// Category-specific recovery suggestion.
    pub suggestion: &'static str,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} (path: {})",
            self.category,
            self.operation,
            self.message,
            self.path.display()
        )
    }
}

impl StdError for SyncError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.underlying
            .as_deref()
            .map(|error| error as &(dyn StdError + 'static))
    }
}

/// Retry-relevant classification of a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryableFailure {
    /// Whether another attempt could plausibly succeed.
    pub retryable: bool,
    /// Whether the failure must stop the whole operation immediately.
    pub fatal: bool,
}

/// Structured shape of a failure, derived before choosing a category or a
/// retry decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FailureShape {
    Cancelled,
    Permission,
    DiskFull,
    NotFound,
    Network,
    TransientIo,
    Corruption,
    Configuration,
    Other,
}

/// Classifies an engine error for the retry manager.
#[must_use]
pub fn classify_retry(error: &EngineError) -> RetryableFailure {
    match shape_of(error) {
        FailureShape::Cancelled => RetryableFailure {
            retryable: false,
            fatal: true,
        },
        FailureShape::Permission
        | FailureShape::DiskFull
        | FailureShape::NotFound
        | FailureShape::Configuration => RetryableFailure {
            retryable: false,
            fatal: false,
        },
        FailureShape::Network | FailureShape::TransientIo => RetryableFailure {
            retryable: true,
            fatal: false,
        },
        // Conservative default: unknown failures are worth another attempt.
        FailureShape::Corruption | FailureShape::Other => RetryableFailure {
            retryable: true,
            fatal: false,
        },
    }
}

/// Builds the aggregator record for a failed operation.
#[must_use]
pub fn classify_sync_error(operation: &str, path: &Path, error: EngineError) -> SyncError {
    let shape = shape_of(&error);
    let (category, recoverable) = match shape {
        FailureShape::Cancelled => (ErrorCategory::Cancellation, false),
        FailureShape::Permission => (ErrorCategory::Permission, false),
        FailureShape::DiskFull => (ErrorCategory::Disk, false),
        FailureShape::Network => (ErrorCategory::Network, true),
        FailureShape::Corruption => (ErrorCategory::Corruption, false),
        FailureShape::Configuration => (ErrorCategory::Configuration, false),
        FailureShape::NotFound => (ErrorCategory::Unknown, false),
        FailureShape::TransientIo | FailureShape::Other => (ErrorCategory::Unknown, true),
    };

    SyncError {
        category,
        operation: operation.to_string(),
        path: path.to_path_buf(),
        message: error.to_string(),
        underlying: Some(Arc::new(error)),
        timestamp: SystemTime::now(),
        recoverable,
        suggestion: category.suggestion(),
    }
}

fn shape_of(error: &EngineError) -> FailureShape {
    match error {
        EngineError::Cancelled | EngineError::Timeout(_) => FailureShape::Cancelled,
        EngineError::Config(_) => FailureShape::Configuration,
        EngineError::Scan(scan) => match scan {
            ScanError::Cancelled => FailureShape::Cancelled,
            ScanError::Root { source, .. } | ScanError::ReadDir { source, .. } => {
                shape_of_io(source)
            }
            ScanError::Worker(_) => FailureShape::Other,
        },
        EngineError::Copy(copy) | EngineError::Backup { source: copy, .. } => match copy {
            CopyError::Cancelled(_) => FailureShape::Cancelled,
            CopyError::Io { source, .. } => shape_of_io(source),
            CopyError::Incomplete { .. } => FailureShape::Corruption,
            CopyError::ShortWrite { .. } => FailureShape::TransientIo,
            CopyError::Worker(_) => FailureShape::Other,
        },
        EngineError::Io { source, .. } => shape_of_io(source),
        EngineError::RetriesExhausted { source, .. } => shape_of(source),
        EngineError::Resolve { .. } => FailureShape::Other,
        EngineError::OutsideRoot { .. } => FailureShape::Configuration,
        EngineError::Watch(_) | EngineError::Worker(_) => FailureShape::Other,
    }
}

fn shape_of_io(error: &io::Error) -> FailureShape {
    use io::ErrorKind;

    #[cfg(unix)]
    if let Some(code) = error.raw_os_error() {
        if code == libc_enospc() || code == libc_edquot() {
            return FailureShape::DiskFull;
        }
    }

    match error.kind() {
        ErrorKind::PermissionDenied => FailureShape::Permission,
        ErrorKind::NotFound => FailureShape::NotFound,
        ErrorKind::TimedOut
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected => FailureShape::Network,
        ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::WriteZero
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock => FailureShape::TransientIo,
        _ => shape_of_message(&error.to_string()),
    }
}

#[cfg(unix)]
const fn libc_enospc() -> i32 {
    28 // ENOSPC on every Unix relay targets
}

#[cfg(unix)]
const fn libc_edquot() -> i32 {
    #[cfg(target_os = "linux")]
    {
        122
    }
    #[cfg(not(target_os = "linux"))]
    {
        69
    }
}

/// Last-resort substring matching for errors that carry no structured kind.
fn shape_of_message(message: &str) -> FailureShape {
    const NETWORK: &[&str] = &[
        "connection refused",
        "connection reset",
        "timeout",
        "network is unreachable",
        "temporary failure",
        "no route to host",
    ];
    const PERMISSION: &[&str] = &[
        "permission denied",
        "access denied",
        "operation not permitted",
        "insufficient privileges",
    ];
    const DISK_FULL: &[&str] = &[
        "no space left on device",
        "disk full",
        "insufficient space",
        "not enough space",
    ];
    const NOT_FOUND: &[&str] = &["no such file or directory", "file not found", "not found"];
    const TRANSIENT_IO: &[&str] = &[
        "i/o error",
        "input/output error",
        "read error",
        "write error",
        "broken pipe",
    ];

    let lower = message.to_ascii_lowercase();
    let contains_any = |patterns: &[&str]| patterns.iter().any(|pattern| lower.contains(pattern));

    if contains_any(NETWORK) {
        FailureShape::Network
    } else if contains_any(PERMISSION) {
        FailureShape::Permission
    } else if contains_any(DISK_FULL) {
        FailureShape::DiskFull
    } else if contains_any(NOT_FOUND) {
        FailureShape::NotFound
    } else if contains_any(TRANSIENT_IO) {
        FailureShape::TransientIo
    } else {
        FailureShape::Other
    }
}

/// Bounded, mutex-serialized collection of classified errors.
///
/// When the buffer is full the oldest entry is evicted. Snapshots are deep
/// copies; callers can render them without holding the lock.
#[derive(Debug)]
pub struct ErrorLog {
    capacity: usize,
    entries: Mutex<VecDeque<SyncError>>,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ERROR_CAPACITY)
    }
}

impl ErrorLog {
    /// Creates a log retaining at most `capacity` errors (floor of one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Records an error, evicting the oldest entry when the log is full.
    pub fn push(&self, error: SyncError) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(error);
    }

    /// Returns a copy of every retained error, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SyncError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    /// Returns the retained errors of one category.
    #[must_use]
    pub fn by_category(&self, category: ErrorCategory) -> Vec<SyncError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|error| error.category == category)
            .cloned()
            .collect()
    }

    /// Returns the retained errors marked recoverable.
    #[must_use]
    pub fn recoverable(&self) -> Vec<SyncError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|error| error.recoverable)
            .cloned()
            .collect()
    }

    /// Returns a `{category → count}` summary of the retained errors.
    #[must_use]
    pub fn summary(&self) -> HashMap<ErrorCategory, usize> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = HashMap::new();
        for error in entries.iter() {
            *summary.entry(error.category).or_insert(0) += 1;
        }
        summary
    }

    /// Number of retained errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Reports whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every retained error.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
