#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `relay_engine` is the concurrent directory mirroring and synchronization
//! engine behind the relay tooling. Given a source tree and a destination
//! tree it produces, in bounded time and with bounded resource usage, a
//! destination matching the desired relationship with the source: a one-way
//! [`SyncEngine::mirror`], a policy-driven [`SyncEngine::sync`], or a
//! continuous [`SyncEngine::watch`].
//!
//! # Design
//!
//! Six components compose into the orchestrator:
//!
//! - the checksum-cached scanner from [`relay_walk`] enumerates both trees;
//! - [`copier::FileCopier`] moves one file at a time, preferring a kernel
//!   zero-copy path with a buffered fallback and rolling back partial
//!   destinations;
//! - [`resolver::ConflictResolver`] classifies divergent records and decides
//!   the action under the configured strategy, optionally prompting through
//!   a blocking callback and taking timestamped backups;
//! - [`retry::RetryManager`] re-runs transient per-file failures under a
//!   backoff policy;
//! - [`errors::ErrorLog`] aggregates classified per-file errors under a
//!   bounded FIFO buffer;
//! - [`watcher::FileWatcher`] debounces raw filesystem notifications into a
//!   serial stream of enriched change events.
//!
//! Per-file work fans out over a bounded worker pool; counters are atomic
//! and readable while workers run. A single [`CancellationToken`] threads
//! through every component boundary and is honoured at pool acquires, copy
//! chunk boundaries, retry waits, and the watcher loop.
//!
//! # Invariants
//!
//! - Per-file failures never abort an operation; they are retried, then
//!   recorded, and the operation returns counters for what was done.
//! - A successful copy implies byte-length parity with the source record and
//!   a flushed destination; failed copies leave no partial destination.
//! - Counters are monotonic within one operation and reset at the start of
//!   the next.
//!
//! # Examples
//!
//! ```no_run
//! use relay_engine::{CancellationToken, SyncEngine};
//!
//! # async fn demo() -> Result<(), relay_engine::EngineError> {
//! let engine = SyncEngine::new();
//! let stats = engine
//!     .mirror(
//!         &CancellationToken::new(),
//!         "/data/source".as_ref(),
//!         "/backup/destination".as_ref(),
//!     )
//!     .await?;
//! println!("copied {} bytes", stats.bytes_transferred);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod copier;
mod engine;
pub mod error;
pub mod errors;
pub mod resolver;
pub mod retry;
pub mod types;
pub mod watcher;
mod zero_copy;

pub use config::{ConflictConfig, EngineConfig, PerformanceConfig, SyncMode, SyncProfile, DEFAULT_BACKUP_DIR};
pub use copier::{CopyError, FileCopier, DEFAULT_COPY_BUFFER_SIZE};
pub use engine::SyncEngine;
pub use error::{EngineError, EngineResult};
pub use errors::{
    classify_retry, classify_sync_error, ErrorCategory, ErrorLog, RetryableFailure, SyncError,
    DEFAULT_ERROR_CAPACITY,
};
pub use resolver::{
    ConflictDescriptor, ConflictKind, ConflictResolver, ConflictStrategy, InteractiveCallback,
    InteractiveDecision, ResolveError, Resolution,
};
pub use retry::{BackoffKind, RetryManager, RetryPolicy};
pub use types::{ChangeEvent, ChangeKind, Progress, SyncOptions, SyncStats};
pub use watcher::{FileWatcher, WatchError, DEFAULT_DEBOUNCE_DELAY};

pub use relay_checksums::DigestAlgorithm;
pub use relay_filters::{FilterRules, FilterSet};
pub use relay_walk::{CancellationToken, FileRecord, ScanError, Scanner};
