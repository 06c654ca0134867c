#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `relay_walk` enumerates filesystem trees for the relay synchronization
//! engine. A [`Scanner`] walks a root, produces one [`FileRecord`] per entry,
//! and digests regular files with a memoizing cache so repeated scans of an
//! unmodified tree never re-read file contents.
//!
//! # Design
//!
//! - [`Walker`] performs a single-threaded, depth-first traversal with
//!   lexicographically sorted directory entries, keeping the emitted order
//!   deterministic regardless of the underlying filesystem's iteration
//!   order. Symbolic links are yielded as plain entries and never followed.
//! - [`Scanner`] drives the walk on the calling task and fans per-entry work
//!   (metadata lookup plus optional digest) onto a bounded tokio pool. The
//!   scan returns only after every dispatched task has settled.
//! - [`DigestCache`] memoizes digests by absolute path, validated against
//!   the entry's modification time (whole seconds) and size. A mismatch on
//!   either field forces recomputation and replaces the cached value.
//! - [`CancellationToken`] is the cheap clonable cancellation signal shared
//!   across the workspace; the scanner honours it at every permit acquire.
//!
//! # Invariants
//!
//! - Every non-directory record with `size > 0` carries a digest iff digest
//!   computation succeeded; digest failure is logged and never fails the
//!   scan.
//! - A per-entry metadata failure drops the entry; a directory read failure
//!   aborts the scan with a [`ScanError`] naming the directory.
//! - Cache entries are replaced, never served, when the stored
//!   `(mtime seconds, size)` pair disagrees with the current record.
//!
//! # Examples
//!
//! ```no_run
//! use relay_walk::{CancellationToken, Scanner};
//!
//! # async fn demo() -> Result<(), relay_walk::ScanError> {
//! let scanner = Scanner::new(0);
//! let records = scanner
//!     .scan(&CancellationToken::new(), "/var/data".as_ref())
//!     .await?;
//! for record in &records {
//!     println!("{} ({} bytes)", record.path.display(), record.size);
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod cancel;
mod entry;
mod error;
mod scanner;
mod walker;

pub use cache::{CacheStats, DigestCache};
pub use cancel::CancellationToken;
pub use entry::{unix_seconds, FileRecord};
pub use error::ScanError;
pub use scanner::{ScanFilter, Scanner, DEFAULT_DIGEST_BUFFER_SIZE};
pub use walker::{WalkItem, Walker};
