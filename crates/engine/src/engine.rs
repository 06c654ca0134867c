//! The sync orchestrator composing scanner, copier, resolver, retry, error
//! aggregation, and the watcher.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::copier::FileCopier;
use crate::error::{EngineError, EngineResult};
use crate::errors::{classify_sync_error, ErrorCategory, ErrorLog, SyncError};
use crate::resolver::{ConflictResolver, InteractiveCallback, Resolution};
use crate::retry::RetryManager;
use crate::types::{ChangeEvent, ChangeKind, Progress, ProgressState, SyncCounters, SyncOptions, SyncStats};
use crate::watcher::{FileWatcher, DEFAULT_DEBOUNCE_DELAY};
use relay_checksums::DigestAlgorithm;
use relay_filters::FilterSet;
use relay_walk::{CancellationToken, FileRecord, ScanFilter, Scanner};

/// Orchestrates mirror, sync, and watch operations.
///
/// The engine owns one scanner (and therefore one digest cache), one copier
/// configuration, a conflict resolver, a retry manager, and the error
/// aggregator. Counters and progress are readable at any time while an
/// operation runs; per-file failures land in the aggregator and never abort
/// the operation.
#[derive(Debug)]
pub struct SyncEngine {
    config: EngineConfig,
    scanner: Arc<Scanner>,
    copier: FileCopier,
    resolver: Arc<ConflictResolver>,
    retry: RetryManager,
    errors: Arc<ErrorLog>,
    counters: Arc<SyncCounters>,
    progress: Arc<ProgressState>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let scanner = Scanner::new(config.performance.io_concurrency);
        Self::assemble(config, scanner)
    }

    /// Creates an engine from a validated configuration record.
    ///
    /// Fails with [`EngineError::Config`] when the record names an unknown
    /// digest algorithm or an empty retry budget.
    pub fn with_config(config: EngineConfig) -> EngineResult<Self> {
        let mut scanner = Scanner::new(config.performance.io_concurrency);

        if let Some(tag) = &config.performance.digest_algorithm {
            let algorithm = tag
                .parse::<DigestAlgorithm>()
                .map_err(|error| EngineError::Config(error.to_string()))?;
            scanner.set_digest_algorithm(algorithm);
        }
        scanner.set_caching(config.performance.enable_caching);

        if config.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }

        Ok(Self::assemble(config, scanner))
    }

    fn assemble(config: EngineConfig, scanner: Scanner) -> Self {
        let copier = FileCopier::new()
            .use_zero_copy(config.performance.use_zero_copy)
            .with_buffer_size(config.profile.buffer_size);
        let resolver = Arc::new(ConflictResolver::new(&config.conflict));
        let retry = RetryManager::new(config.retry);

        Self {
            scanner: Arc::new(scanner),
            copier,
            resolver,
            retry,
            errors: Arc::new(ErrorLog::default()),
            counters: Arc::new(SyncCounters::default()),
            progress: Arc::new(ProgressState::default()),
            config,
        }
    }

    /// Installs the blocking callback consulted by the interactive conflict
    /// strategy.
    pub fn set_interactive_callback(&self, callback: InteractiveCallback) {
        self.resolver.set_interactive_callback(callback);
    }

    /// The configuration the engine was built from.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine's scanner (shared digest cache included).
    #[must_use]
    pub const fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    /// One-way mirror: recursive, preserving, digest-verifying, and without
    /// extraneous deletion.
    pub async fn mirror(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
    ) -> EngineResult<SyncStats> {
        self.sync(cancel, source, destination, SyncOptions::mirror())
            .await
    }

    /// Synchronizes `source` into `destination` under `options`.
    ///
    /// A source-scan failure or cancellation aborts the operation; per-file
    /// failures are retried, then recorded in the aggregator, and the
    /// operation completes with counters reflecting what was done.
    pub async fn sync(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
        options: SyncOptions,
    ) -> EngineResult<SyncStats> {
        self.counters.reset();
        self.progress.reset();
        self.counters.mark_start();

        let run = self.sync_inner(cancel, source, destination, &options);
        let result = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(limit)),
            },
            None => run.await,
        };

        self.counters.mark_end();
        let stats = self.counters.snapshot();

        match result {
            Ok(()) => {
                tracing::info!(
                    source = %source.display(),
                    destination = %destination.display(),
                    scanned = stats.files_scanned,
                    changed = stats.files_changed,
                    errors = stats.errors_encountered,
                    "sync complete"
                );
                Ok(stats)
            }
            Err(error) => Err(error),
        }
    }

    async fn sync_inner(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
        options: &SyncOptions,
    ) -> EngineResult<()> {
        let source_filter = self.scan_filter(source)?;
        let mut source_records = self
            .scanner
            .scan_with_filter(cancel, source, source_filter)
            .await?;

        if !options.recursive {
            source_records.retain(|record| {
                record
                    .path
                    .strip_prefix(source)
                    .map(|rel| rel.components().count() <= 1)
                    .unwrap_or(false)
            });
        }

        self.counters.set_scanned(source_records.len() as u64);
        self.progress.set_total(source_records.len() as u64);

        let destination_filter = self.scan_filter(destination)?;
        let destination_records = match self
            .scanner
            .scan_with_filter(cancel, destination, destination_filter)
            .await
        {
            Ok(records) => records,
            Err(error) if error.is_root_not_found() => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        let mut destination_map = HashMap::new();
        for record in destination_records {
            if let Ok(rel) = record.path.strip_prefix(destination) {
                destination_map.insert(rel.to_path_buf(), record);
            }
        }
        let destination_map = Arc::new(destination_map);

        let source_rels: HashSet<PathBuf> = source_records
            .iter()
            .filter_map(|record| {
                record
                    .path
                    .strip_prefix(source)
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();

        let workers = if options.workers > 0 {
            options.workers
        } else {
            self.scanner.max_concurrency()
        };
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));

        let context = Arc::new(TaskContext {
            source_root: source.to_path_buf(),
            destination_root: destination.to_path_buf(),
            options: options.clone(),
            destination_map: Arc::clone(&destination_map),
            copier: self.copier_for(options),
            resolver: Arc::clone(&self.resolver),
            retry: self.retry,
            counters: Arc::clone(&self.counters),
            errors: Arc::clone(&self.errors),
            cancel: cancel.clone(),
        });

        let mut tasks: JoinSet<()> = JoinSet::new();
        for record in source_records {
            if cancel.is_cancelled() {
                tasks.shutdown().await;
                return Err(EngineError::Cancelled);
            }

            let permit = tokio::select! {
                () = cancel.cancelled() => {
                    tasks.shutdown().await;
                    return Err(EngineError::Cancelled);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        tasks.shutdown().await;
                        return Err(EngineError::Cancelled);
                    }
                },
            };

            let context = Arc::clone(&context);
            let progress = Arc::clone(&self.progress);
            tasks.spawn(async move {
                let _permit = permit;
                let path = record.path.clone();
                if let Err(failure) = sync_one(&context, record).await {
                    if failure.category == ErrorCategory::Cancellation {
                        tracing::debug!(path = %path.display(), "file abandoned by cancellation");
                    } else {
                        tracing::warn!(%failure, "file failed to sync");
                    }
                }
                progress.advance(&path);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined?;
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if options.delete_extraneous {
            self.delete_extraneous(cancel, destination, &source_rels, &destination_map, options)
                .await?;
        }

        Ok(())
    }

    /// Removes destination entries absent from the source, deepest entries
    /// first so directories empty out before they are removed themselves.
    async fn delete_extraneous(
        &self,
        cancel: &CancellationToken,
        destination: &Path,
        source_rels: &HashSet<PathBuf>,
        destination_map: &HashMap<PathBuf, FileRecord>,
        options: &SyncOptions,
    ) -> EngineResult<()> {
        let mut doomed: Vec<(&PathBuf, &FileRecord)> = destination_map
            .iter()
            .filter(|(rel, _)| !source_rels.contains(*rel))
            .collect();
        doomed.sort_by(|a, b| b.0.components().count().cmp(&a.0.components().count()));

        for (rel, record) in doomed {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if options.dry_run {
                self.counters.add_deleted();
                continue;
            }

            let target = destination.join(rel);
            let removal = if record.is_dir {
                tokio::fs::remove_dir(&target).await
            } else {
                tokio::fs::remove_file(&target).await
            };

            match removal {
                Ok(()) => {
                    self.counters.add_deleted();
                    tracing::debug!(path = %target.display(), "removed extraneous entry");
                }
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    let failure =
                        classify_sync_error("delete", &target, EngineError::io(&target, error));
                    self.errors.push(failure);
                    self.counters.add_error();
                }
            }
        }

        Ok(())
    }

    /// Long-running watch mode over the configured profile. Returns when the
    /// cancellation signal fires.
    pub async fn watch(&self, cancel: &CancellationToken) -> EngineResult<()> {
        let source = self.config.profile.source.clone();
        let destination = self.config.profile.destination.clone();
        if source.as_os_str().is_empty() || destination.as_os_str().is_empty() {
            return Err(EngineError::Config(
                "watch mode requires both source and destination".to_string(),
            ));
        }

        let watcher = FileWatcher::new(DEFAULT_DEBOUNCE_DELAY, Arc::clone(&self.scanner))?;
        watcher.add(&source)?;
        watcher.start(cancel)?;

        let mut events = watcher
            .take_events()
            .ok_or_else(|| EngineError::Config("watch event stream already consumed".to_string()))?;
        let mut errors = watcher
            .take_errors()
            .ok_or_else(|| EngineError::Config("watch error stream already consumed".to_string()))?;

        tracing::info!(
            source = %source.display(),
            destination = %destination.display(),
            "watching for changes"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.apply_change_event(cancel, &source, &destination, event).await;
                }
                error = errors.recv() => {
                    if let Some(error) = error {
                        let failure = classify_sync_error(
                            "watch",
                            &source,
                            EngineError::Watch(error.into()),
                        );
                        self.errors.push(failure);
                        self.counters.add_error();
                    }
                }
            }
        }

        let _ = watcher.stop();
        Ok(())
    }

    async fn apply_change_event(
        &self,
        cancel: &CancellationToken,
        source_root: &Path,
        destination_root: &Path,
        event: ChangeEvent,
    ) {
        let Ok(rel) = event.path.strip_prefix(source_root) else {
            return;
        };
        let target = destination_root.join(rel);

        match event.kind {
            ChangeKind::Create | ChangeKind::Modify => {
                let is_file = event
                    .record
                    .as_ref()
                    .is_some_and(|record| record.is_file());
                if !is_file {
                    return;
                }
                if let Err(error) = self.copier.copy_file(cancel, &event.path, &target).await {
                    let failure = classify_sync_error("watch-copy", &event.path, error.into());
                    tracing::warn!(%failure, "failed to apply watched change");
                    self.errors.push(failure);
                    self.counters.add_error();
                }
            }
            ChangeKind::Delete => {
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                    Err(_) => {
                        // The path may be a directory; mirror its removal too.
                        if let Err(error) = tokio::fs::remove_dir_all(&target).await {
                            if error.kind() != io::ErrorKind::NotFound {
                                let failure = classify_sync_error(
                                    "watch-delete",
                                    &target,
                                    EngineError::io(&target, error),
                                );
                                tracing::warn!(%failure, "failed to mirror watched deletion");
                                self.errors.push(failure);
                                self.counters.add_error();
                            }
                        }
                    }
                }
            }
            ChangeKind::Rename => {}
        }
    }

    /// Snapshot of the current operation counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }

    /// Derived progress view of the running (or last) operation.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress.snapshot(&self.counters)
    }

    /// Copies of the aggregated per-file errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<SyncError> {
        self.errors.snapshot()
    }

    /// `{category → count}` summary of the aggregated errors.
    #[must_use]
    pub fn error_summary(&self) -> HashMap<ErrorCategory, usize> {
        self.errors.summary()
    }

    /// Drops every aggregated error.
    pub fn clear_errors(&self) {
        self.errors.clear();
    }

    fn copier_for(&self, options: &SyncOptions) -> FileCopier {
        let mut copier = self
            .copier
            .clone()
            .preserve_permissions(options.preserve_perms)
            .preserve_times(options.preserve_times);
        if options.buffer_size > 0 {
            copier = copier.with_buffer_size(options.buffer_size);
        }
        copier
    }

    /// Compiles the configured filter rules into a scanner predicate rooted
    /// at `root`. Returns `None` when the rules accept everything, so the
    /// default path skips per-entry matching entirely.
    fn scan_filter(&self, root: &Path) -> EngineResult<Option<ScanFilter>> {
        let rules = &self.config.filters;
        let unfiltered = rules.include.is_empty()
            && rules.exclude.is_empty()
            && !rules.smart
            && !rules.respect_gitignore
            && !rules.ignore_hidden
            && rules.min_file_size.is_none()
            && rules.max_file_size.is_none();
        if unfiltered {
            return Ok(None);
        }

        let set = FilterSet::compile(rules, Some(root))
            .map_err(|error| EngineError::Config(error.to_string()))?;
        let set = Arc::new(set);
        let root = root.to_path_buf();

        let filter: ScanFilter = Arc::new(move |path: &Path, record: &FileRecord| {
            match path.strip_prefix(&root) {
                Ok(rel) => set.matches(rel, record.size, record.is_dir),
                Err(_) => true,
            }
        });
        Ok(Some(filter))
    }
}

/// Everything a per-file worker needs, shared behind one `Arc`.
struct TaskContext {
    source_root: PathBuf,
    destination_root: PathBuf,
    options: SyncOptions,
    destination_map: Arc<HashMap<PathBuf, FileRecord>>,
    copier: FileCopier,
    resolver: Arc<ConflictResolver>,
    retry: RetryManager,
    counters: Arc<SyncCounters>,
    errors: Arc<ErrorLog>,
    cancel: CancellationToken,
}

impl TaskContext {
    /// Classifies a per-file failure, records it, bumps the error counter,
    /// and hands it back for the dispatcher's log line.
    fn record_failure(&self, operation: &str, path: &Path, error: EngineError) -> SyncError {
        let failure = classify_sync_error(operation, path, error);
        self.errors.push(failure.clone());
        self.counters.add_error();
        failure
    }
}

/// Synchronizes a single source record into the destination tree.
async fn sync_one(ctx: &TaskContext, record: FileRecord) -> Result<(), SyncError> {
    let rel = match record.path.strip_prefix(&ctx.source_root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let error = EngineError::OutsideRoot {
                path: record.path.clone(),
                root: ctx.source_root.clone(),
            };
            return Err(ctx.record_failure("sync", &record.path, error));
        }
    };
    let destination_path = ctx.destination_root.join(&rel);
    let destination_entry = ctx.destination_map.get(&rel);

    let needs = match destination_entry {
        None => true,
        Some(existing) => {
            let needs = needs_sync(&record, existing, &ctx.options);
            if needs {
                if let Some(conflict) = ConflictResolver::detect(&rel, &record, existing) {
                    ctx.counters.add_conflict_found();

                    let resolution = match ctx.resolver.resolve(&conflict).await {
                        Ok(resolution) => resolution,
                        Err(source) => {
                            let error = EngineError::Resolve {
                                path: record.path.clone(),
                                source,
                            };
                            return Err(ctx.record_failure("resolve", &record.path, error));
                        }
                    };

                    match resolution {
                        Resolution::Skip | Resolution::UseDestination => return Ok(()),
                        Resolution::BackupThenUseSource => {
                            match ctx.resolver.backup(&ctx.cancel, &destination_path).await {
                                Ok(_) => ctx.counters.add_conflict_resolved(),
                                Err(source) => {
                                    let error = EngineError::Backup {
                                        path: destination_path.clone(),
                                        source,
                                    };
                                    return Err(ctx.record_failure(
                                        "backup",
                                        &destination_path,
                                        error,
                                    ));
                                }
                            }
                        }
                        Resolution::UseSource => ctx.counters.add_conflict_resolved(),
                        Resolution::Merge => {}
                    }
                }
            }
            needs
        }
    };

    if !needs {
        return Ok(());
    }

    if ctx.options.dry_run {
        if destination_entry.is_some() {
            ctx.counters.add_modified();
        } else {
            ctx.counters.add_created();
        }
        ctx.counters.add_changed();
        return Ok(());
    }

    if record.is_dir {
        if let Err(error) = ctx
            .copier
            .copy_file(&ctx.cancel, &record.path, &destination_path)
            .await
        {
            return Err(ctx.record_failure("create-dir", &destination_path, error.into()));
        }
        ctx.counters.add_created();
        ctx.counters.add_changed();
        return Ok(());
    }

    let copier = ctx.copier.clone();
    let cancel = ctx.cancel.clone();
    let source_path = record.path.clone();
    let target = destination_path.clone();
    let copied = ctx
        .retry
        .run(&ctx.cancel, "copy", move || {
            let copier = copier.clone();
            let cancel = cancel.clone();
            let source_path = source_path.clone();
            let target = target.clone();
            async move {
                copier
                    .copy_file(&cancel, &source_path, &target)
                    .await
                    .map(|_| ())
                    .map_err(EngineError::from)
            }
        })
        .await;

    if let Err(error) = copied {
        return Err(ctx.record_failure("copy", &record.path, error));
    }

    ctx.counters.add_bytes(record.size);
    if destination_entry.is_some() {
        ctx.counters.add_modified();
    } else {
        ctx.counters.add_created();
    }
    ctx.counters.add_changed();
    Ok(())
}

/// Reports whether a source record must be written to the destination.
fn needs_sync(source: &FileRecord, destination: &FileRecord, options: &SyncOptions) -> bool {
    if source.size != destination.size {
        return true;
    }
    if source.modified != destination.modified {
        return true;
    }
    if options.checksum_verify {
        if let (Some(a), Some(b)) = (&source.digest, &destination.digest) {
            return a != b;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn record(size: u64, modified: SystemTime, digest: Option<&str>) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/tree/file"),
            size,
            modified,
            mode: 0o644,
            is_dir: false,
            digest: digest.map(str::to_string),
            digest_algo: None,
        }
    }

    #[test]
    fn needs_sync_on_size_difference() {
        let now = SystemTime::now();
        assert!(needs_sync(
            &record(10, now, None),
            &record(20, now, None),
            &SyncOptions::default()
        ));
    }

    #[test]
    fn needs_sync_on_mtime_difference() {
        let now = SystemTime::now();
        let earlier = now - std::time::Duration::from_secs(5);
        assert!(needs_sync(
            &record(10, now, None),
            &record(10, earlier, None),
            &SyncOptions::default()
        ));
    }

    #[test]
    fn digest_differences_require_checksum_verify() {
        let now = SystemTime::now();
        let source = record(10, now, Some("aaa"));
        let destination = record(10, now, Some("bbb"));

        assert!(!needs_sync(&source, &destination, &SyncOptions::default()));

        let options = SyncOptions {
            checksum_verify: true,
            ..SyncOptions::default()
        };
        assert!(needs_sync(&source, &destination, &options));
    }

    #[test]
    fn identical_records_do_not_need_sync() {
        let now = SystemTime::now();
        let options = SyncOptions {
            checksum_verify: true,
            ..SyncOptions::default()
        };
        assert!(!needs_sync(
            &record(10, now, Some("aaa")),
            &record(10, now, Some("aaa")),
            &options
        ));
    }

    #[test]
    fn missing_digest_disables_the_digest_check() {
        let now = SystemTime::now();
        let options = SyncOptions {
            checksum_verify: true,
            ..SyncOptions::default()
        };
        assert!(!needs_sync(
            &record(10, now, None),
            &record(10, now, Some("bbb")),
            &options
        ));
    }

    #[test]
    fn unknown_digest_algorithm_is_a_config_error() {
        let config = EngineConfig {
            performance: crate::config::PerformanceConfig {
                digest_algorithm: Some("md5".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let error = SyncEngine::with_config(config).unwrap_err();
        assert!(matches!(error, EngineError::Config(_)));
    }

    #[test]
    fn zero_retry_budget_is_a_config_error() {
        let config = EngineConfig {
            retry: crate::retry::RetryPolicy {
                max_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let error = SyncEngine::with_config(config).unwrap_err();
        assert!(matches!(error, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn watch_requires_a_complete_profile() {
        let engine = SyncEngine::new();
        let error = engine.watch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, EngineError::Config(_)));
    }
}
