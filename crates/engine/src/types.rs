//! Shared value types: change events, sync options, counters, and progress.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use relay_walk::FileRecord;

/// Kind of an observed filesystem change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    /// An entry appeared.
    Create,
    /// An entry's contents or metadata changed.
    Modify,
    /// An entry disappeared.
    Delete,
    /// An entry moved.
    Rename,
}

/// One observed filesystem change, post-debounce.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Path the change applies to.
    pub path: PathBuf,
    /// Previous path for renames, when the backend reports one.
    pub old_path: Option<PathBuf>,
    /// Fresh metadata for the path, absent when the entry no longer exists.
    pub record: Option<FileRecord>,
    /// When the debounced event was delivered.
    pub timestamp: SystemTime,
}

/// Options accepted by [`SyncEngine::sync`](crate::SyncEngine::sync).
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Plan and count, but write nothing.
    pub dry_run: bool,
    /// Descend into subdirectories. When off, only top-level entries of the
    /// source are considered.
    pub recursive: bool,
    /// Re-apply the source's permission bits to copied entries.
    pub preserve_perms: bool,
    /// Re-apply the source's modification time to copied entries.
    pub preserve_times: bool,
    /// Remove destination entries that have no counterpart in the source
    /// once the copy phase has settled.
    pub delete_extraneous: bool,
    /// Compare content digests (when both sides carry one) in addition to
    /// size and modification time.
    pub checksum_verify: bool,
    /// Worker-pool size for per-file dispatch. Zero selects the scanner's
    /// concurrency.
    pub workers: usize,
    /// Copy buffer size in bytes. Zero selects the copier default.
    pub buffer_size: usize,
    /// Hard wall-clock deadline for the whole operation.
    pub timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            recursive: true,
            preserve_perms: false,
            preserve_times: false,
            delete_extraneous: false,
            checksum_verify: false,
            workers: 0,
            buffer_size: 0,
            timeout: None,
        }
    }
}

impl SyncOptions {
    /// The option set used by mirror operations: recursive, preserving, and
    /// digest-verifying, without extraneous deletion.
    #[must_use]
    pub fn mirror() -> Self {
        Self {
            recursive: true,
            preserve_perms: true,
            preserve_times: true,
            checksum_verify: true,
            ..Self::default()
        }
    }
}

/// Snapshot of the counters for one synchronization operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncStats {
    /// Entries produced by the source scan.
    pub files_scanned: u64,
    /// Entries that were actually written (created or overwritten).
    pub files_changed: u64,
    /// Entries created at the destination.
    pub files_created: u64,
    /// Entries overwritten at the destination.
    pub files_modified: u64,
    /// Destination entries removed by the extraneous-deletion pass.
    pub files_deleted: u64,
    /// Bytes successfully copied.
    pub bytes_transferred: u64,
    /// Conflicts detected between source and destination records.
    pub conflicts_found: u64,
    /// Conflicts where the source version was enforced.
    pub conflicts_resolved: u64,
    /// Per-file failures recorded in the aggregator.
    pub errors_encountered: u64,
    /// Wall-clock start of the operation.
    pub started_at: Option<SystemTime>,
    /// Wall-clock end of the operation.
    pub finished_at: Option<SystemTime>,
    /// Elapsed time between start and end (or now, while running).
    pub duration: Duration,
}

/// Derived progress view, computed at read time from live counters.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    /// Entries dispatched so far.
    pub current: u64,
    /// Total entries to process.
    pub total: u64,
    /// `current / total` as a percentage, zero when the total is unknown.
    pub percentage: f64,
    /// Transfer throughput in bytes per second.
    pub bytes_per_second: u64,
    /// Estimated time to completion.
    pub eta: Duration,
    /// Path most recently dispatched.
    pub current_file: PathBuf,
}

/// Monotonic operation counters, atomically incremented by workers and
/// readable at any time. Each field is individually consistent; no
/// cross-field atomicity is promised.
#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    scanned: AtomicU64,
    changed: AtomicU64,
    created: AtomicU64,
    modified: AtomicU64,
    deleted: AtomicU64,
    bytes: AtomicU64,
    conflicts_found: AtomicU64,
    conflicts_resolved: AtomicU64,
    errors: AtomicU64,
    window: Mutex<TimeWindow>,
}

#[derive(Debug, Default)]
struct TimeWindow {
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
    started_instant: Option<Instant>,
    elapsed: Option<Duration>,
}

impl SyncCounters {
    pub(crate) fn reset(&self) {
        self.scanned.store(0, Ordering::Relaxed);
        self.changed.store(0, Ordering::Relaxed);
        self.created.store(0, Ordering::Relaxed);
        self.modified.store(0, Ordering::Relaxed);
        self.deleted.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.conflicts_found.store(0, Ordering::Relaxed);
        self.conflicts_resolved.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        *window = TimeWindow::default();
    }

    pub(crate) fn mark_start(&self) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.started_at = Some(SystemTime::now());
        window.started_instant = Some(Instant::now());
        window.finished_at = None;
        window.elapsed = None;
    }

    pub(crate) fn mark_end(&self) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.finished_at = Some(SystemTime::now());
        window.elapsed = window.started_instant.map(|start| start.elapsed());
    }

    pub(crate) fn set_scanned(&self, value: u64) {
        self.scanned.store(value, Ordering::Relaxed);
    }

    pub(crate) fn add_changed(&self) {
        self.changed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_modified(&self) {
        self.modified.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_conflict_found(&self) {
        self.conflicts_found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_conflict_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn started_instant(&self) -> Option<Instant> {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.started_instant
    }

    pub(crate) fn snapshot(&self) -> SyncStats {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let duration = window.elapsed.or_else(|| {
            window.started_instant.map(|start| start.elapsed())
        });
        SyncStats {
            files_scanned: self.scanned.load(Ordering::Relaxed),
            files_changed: self.changed.load(Ordering::Relaxed),
            files_created: self.created.load(Ordering::Relaxed),
            files_modified: self.modified.load(Ordering::Relaxed),
            files_deleted: self.deleted.load(Ordering::Relaxed),
            bytes_transferred: self.bytes.load(Ordering::Relaxed),
            conflicts_found: self.conflicts_found.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            errors_encountered: self.errors.load(Ordering::Relaxed),
            started_at: window.started_at,
            finished_at: window.finished_at,
            duration: duration.unwrap_or_default(),
        }
    }
}

/// Live progress inputs maintained by the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct ProgressState {
    current: AtomicU64,
    total: AtomicU64,
    current_file: Mutex<PathBuf>,
}

impl ProgressState {
    pub(crate) fn reset(&self) {
        self.current.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        let mut file = self.current_file.lock().unwrap_or_else(|e| e.into_inner());
        file.clear();
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, path: &std::path::Path) {
        self.current.fetch_add(1, Ordering::Relaxed);
        let mut file = self.current_file.lock().unwrap_or_else(|e| e.into_inner());
        *file = path.to_path_buf();
    }

    pub(crate) fn snapshot(&self, counters: &SyncCounters) -> Progress {
        let current = self.current.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let percentage = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let elapsed = counters
            .started_instant()
            .map(|start| start.elapsed())
            .unwrap_or_default();
        let bytes_per_second = if elapsed.as_secs_f64() > 0.0 {
            (counters.bytes_transferred() as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };

        let eta = if current > 0 && elapsed.as_secs_f64() > 0.0 && total > current {
            let per_entry = elapsed.as_secs_f64() / current as f64;
            Duration::from_secs_f64(per_entry * (total - current) as f64)
        } else {
            Duration::ZERO
        };

        let current_file = self
            .current_file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        Progress {
            current,
            total,
            percentage,
            bytes_per_second,
            eta,
            current_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn counters_reset_clears_every_field() {
        let counters = SyncCounters::default();
        counters.set_scanned(5);
        counters.add_changed();
        counters.add_created();
        counters.add_bytes(100);
        counters.mark_start();
        counters.mark_end();

        counters.reset();
        let stats = counters.snapshot();
        assert_eq!(stats, SyncStats::default());
    }

    #[test]
    fn snapshot_reflects_increments() {
        let counters = SyncCounters::default();
        counters.mark_start();
        counters.set_scanned(3);
        counters.add_created();
        counters.add_modified();
        counters.add_changed();
        counters.add_changed();
        counters.add_bytes(42);
        counters.add_conflict_found();
        counters.add_conflict_resolved();
        counters.add_error();
        counters.mark_end();

        let stats = counters.snapshot();
        assert_eq!(stats.files_scanned, 3);
        assert_eq!(stats.files_created, 1);
        assert_eq!(stats.files_modified, 1);
        assert_eq!(stats.files_changed, 2);
        assert_eq!(stats.bytes_transferred, 42);
        assert_eq!(stats.conflicts_found, 1);
        assert_eq!(stats.conflicts_resolved, 1);
        assert_eq!(stats.errors_encountered, 1);
        assert!(stats.started_at.is_some());
        assert!(stats.finished_at.is_some());
    }

    #[test]
    fn progress_percentage_and_eta_derive_from_counters() {
        let counters = SyncCounters::default();
        counters.mark_start();
        let progress = ProgressState::default();
        progress.set_total(4);
        progress.advance(Path::new("/a"));
        progress.advance(Path::new("/b"));

        let view = progress.snapshot(&counters);
        assert_eq!(view.current, 2);
        assert_eq!(view.total, 4);
        assert!((view.percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(view.current_file, Path::new("/b"));
    }

    #[test]
    fn mirror_options_enable_preservation_and_digests() {
        let options = SyncOptions::mirror();
        assert!(options.recursive);
        assert!(options.preserve_perms);
        assert!(options.preserve_times);
        assert!(options.checksum_verify);
        assert!(!options.delete_extraneous);
        assert!(!options.dry_run);
    }
}
