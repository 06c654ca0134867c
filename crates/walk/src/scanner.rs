//! Checksum-cached tree scanning with a bounded digest pool.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use relay_checksums::DigestAlgorithm;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::{CacheStats, DigestCache};
use crate::cancel::CancellationToken;
use crate::entry::FileRecord;
use crate::error::ScanError;
use crate::walker::Walker;

/// Chunk size used when streaming a file into the digest state.
pub const DEFAULT_DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Predicate applied to each record before it is retained.
pub type ScanFilter = Arc<dyn Fn(&Path, &FileRecord) -> bool + Send + Sync>;

/// Recursive tree scanner with digest memoization.
///
/// The walk itself runs on the calling task; per-entry metadata lookup and
/// digest computation are dispatched onto a tokio pool gated by a semaphore
/// sized to the configured concurrency. [`Scanner::scan`] returns only after
/// every dispatched task has settled, so the returned records are complete.
#[derive(Debug)]
pub struct Scanner {
    max_concurrency: usize,
    algorithm: DigestAlgorithm,
    caching: bool,
    cache: Arc<DigestCache>,
}

impl Scanner {
    /// Creates a scanner. `max_concurrency == 0` selects twice the available
    /// parallelism.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: resolve_max_concurrency(max_concurrency),
            algorithm: DigestAlgorithm::default(),
            caching: true,
            cache: Arc::new(DigestCache::new()),
        }
    }

    /// Returns the effective worker-pool size.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Selects the digest algorithm for subsequent scans. Cached digests
    /// from another algorithm are dropped.
    pub fn set_digest_algorithm(&mut self, algorithm: DigestAlgorithm) {
        if self.algorithm != algorithm {
            self.algorithm = algorithm;
            self.cache.clear();
        }
    }

    /// Returns the digest algorithm in effect.
    #[must_use]
    pub const fn digest_algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Enables or disables digest memoization.
    pub fn set_caching(&mut self, caching: bool) {
        self.caching = caching;
    }

    /// Drops every memoized digest.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Returns `(entry count, aggregate cached file sizes)`.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Recursively scans `root` and returns one record per entry beneath it.
    pub async fn scan(
        &self,
        cancel: &CancellationToken,
        root: &Path,
    ) -> Result<Vec<FileRecord>, ScanError> {
        self.scan_with_filter(cancel, root, None).await
    }

    /// Scans `root`, retaining only records the filter accepts.
    pub async fn scan_with_filter(
        &self,
        cancel: &CancellationToken,
        root: &Path,
        filter: Option<ScanFilter>,
    ) -> Result<Vec<FileRecord>, ScanError> {
        let walker = Walker::new(root)?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<Option<FileRecord>> = JoinSet::new();

        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(error) => {
                    tasks.shutdown().await;
                    return Err(error);
                }
            };

            if cancel.is_cancelled() {
                tasks.shutdown().await;
                return Err(ScanError::Cancelled);
            }

            let permit = tokio::select! {
                () = cancel.cancelled() => {
                    tasks.shutdown().await;
                    return Err(ScanError::Cancelled);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        tasks.shutdown().await;
                        return Err(ScanError::Cancelled);
                    }
                },
            };

            let cache = Arc::clone(&self.cache);
            let algorithm = self.algorithm;
            let caching = self.caching;
            let filter = filter.clone();
            let full_path = item.full_path;

            tasks.spawn(async move {
                let _permit = permit;
                let record = build_record(&cache, caching, algorithm, full_path).await?;
                match &filter {
                    Some(filter) if !filter(&record.path, &record) => None,
                    _ => Some(record),
                }
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Some(record) = joined? {
                records.push(record);
            }
        }

        tracing::debug!(
            root = %root.display(),
            entries = records.len(),
            "scan complete"
        );

        Ok(records)
    }

    /// Builds a record for a single path, digesting regular files. Used by
    /// the watcher to enrich debounced events.
    pub async fn stat_record(&self, path: &Path) -> io::Result<FileRecord> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        let mut record = FileRecord::from_metadata(path.to_path_buf(), &metadata);
        if record.is_file() && record.size > 0 {
            match digest_file(&self.cache, self.caching, self.algorithm, &record).await {
                Ok(digest) => {
                    record.digest = Some(digest);
                    record.digest_algo = Some(self.algorithm);
                }
                Err(error) => {
                    tracing::debug!(
                        path = %record.path.display(),
                        %error,
                        "digest failed; record kept without digest"
                    );
                }
            }
        }
        Ok(record)
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(0)
    }
}

fn resolve_max_concurrency(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(4)
    }
}

async fn build_record(
    cache: &DigestCache,
    caching: bool,
    algorithm: DigestAlgorithm,
    full_path: PathBuf,
) -> Option<FileRecord> {
    let metadata = match tokio::fs::symlink_metadata(&full_path).await {
        Ok(metadata) => metadata,
        Err(error) => {
            tracing::debug!(
                path = %full_path.display(),
                %error,
                "dropping entry with failed stat"
            );
            return None;
        }
    };

    let mut record = FileRecord::from_metadata(full_path, &metadata);
    if record.is_file() && record.size > 0 {
        match digest_file(cache, caching, algorithm, &record).await {
            Ok(digest) => {
                record.digest = Some(digest);
                record.digest_algo = Some(algorithm);
            }
            Err(error) => {
                tracing::debug!(
                    path = %record.path.display(),
                    %error,
                    "digest failed; record kept without digest"
                );
            }
        }
    }
    Some(record)
}

async fn digest_file(
    cache: &DigestCache,
    caching: bool,
    algorithm: DigestAlgorithm,
    record: &FileRecord,
) -> io::Result<String> {
    let mtime_seconds = record.mtime_seconds();
    if caching {
        if let Some(digest) = cache.lookup(&record.path, mtime_seconds, record.size) {
            return Ok(digest);
        }
    }

    let mut file = tokio::fs::File::open(&record.path).await?;
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; DEFAULT_DIGEST_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let digest = hasher.finalize_hex();
    if caching {
        cache.store(record.path.clone(), digest.clone(), mtime_seconds, record.size);
    }
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn digest_of(records: &[FileRecord], name: &str) -> Option<String> {
        records
            .iter()
            .find(|record| record.path.file_name().is_some_and(|n| n == name))
            .and_then(|record| record.digest.clone())
    }

    #[tokio::test]
    async fn scan_records_files_and_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("sub")).expect("mkdir");
        fs::write(temp.path().join("sub/data.txt"), b"hello").expect("write");
        fs::write(temp.path().join("empty.txt"), b"").expect("write empty");

        let scanner = Scanner::new(2);
        let records = scanner
            .scan(&CancellationToken::new(), temp.path())
            .await
            .expect("scan");

        assert_eq!(records.len(), 3);

        let dir = records.iter().find(|r| r.is_dir).expect("dir record");
        assert!(dir.digest.is_none());

        // Empty files receive no digest; non-empty regular files do.
        assert!(digest_of(&records, "empty.txt").is_none());
        let digest = digest_of(&records, "data.txt").expect("digest");
        assert_eq!(digest.len(), 64);
    }

    #[tokio::test]
    async fn second_scan_reuses_cached_digests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("data.bin");
        fs::write(&file, b"aaaa").expect("write");
        let original_mtime = filetime::FileTime::from_last_modification_time(
            &fs::metadata(&file).expect("metadata"),
        );

        let scanner = Scanner::new(2);
        let cancel = CancellationToken::new();
        let first = scanner.scan(&cancel, temp.path()).await.expect("scan");
        let first_digest = digest_of(&first, "data.bin").expect("digest");
        assert_eq!(scanner.cache_stats().0, 1);

        // Rewrite with different content but identical size and mtime: a
        // cache hit must serve the stale digest without opening the file.
        fs::write(&file, b"bbbb").expect("rewrite");
        filetime::set_file_mtime(&file, original_mtime).expect("restore mtime");

        let second = scanner.scan(&cancel, temp.path()).await.expect("rescan");
        assert_eq!(digest_of(&second, "data.bin").expect("digest"), first_digest);

        // Clearing the cache forces recomputation and reveals the change.
        scanner.clear_cache();
        assert_eq!(scanner.cache_stats(), (0, 0));
        let third = scanner.scan(&cancel, temp.path()).await.expect("rescan");
        assert_ne!(digest_of(&third, "data.bin").expect("digest"), first_digest);
    }

    #[tokio::test]
    async fn size_change_invalidates_cache_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("data.bin");
        fs::write(&file, b"1234").expect("write");

        let scanner = Scanner::new(1);
        let cancel = CancellationToken::new();
        let first = scanner.scan(&cancel, temp.path()).await.expect("scan");
        let first_digest = digest_of(&first, "data.bin").expect("digest");

        fs::write(&file, b"123456").expect("grow");
        let second = scanner.scan(&cancel, temp.path()).await.expect("rescan");
        assert_ne!(digest_of(&second, "data.bin").expect("digest"), first_digest);
    }

    #[tokio::test]
    async fn filter_drops_rejected_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("keep.txt"), b"k").expect("write");
        fs::write(temp.path().join("drop.log"), b"d").expect("write");

        let scanner = Scanner::new(2);
        let filter: ScanFilter = Arc::new(|path: &Path, _record: &FileRecord| {
            path.extension().is_some_and(|ext| ext == "txt")
        });
        let records = scanner
            .scan_with_filter(&CancellationToken::new(), temp.path(), Some(filter))
            .await
            .expect("scan");

        assert_eq!(records.len(), 1);
        assert!(records[0].path.ends_with("keep.txt"));
    }

    #[tokio::test]
    async fn cancelled_scan_fails_fast() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"a").expect("write");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let scanner = Scanner::new(1);
        let error = scanner.scan(&cancel, temp.path()).await.unwrap_err();
        assert!(matches!(error, ScanError::Cancelled));
    }

    #[tokio::test]
    async fn missing_root_is_a_scan_failure() {
        let scanner = Scanner::new(1);
        let error = scanner
            .scan(&CancellationToken::new(), Path::new("/missing/root/path"))
            .await
            .unwrap_err();
        assert!(error.is_root_not_found());
    }

    #[tokio::test]
    async fn stat_record_digests_regular_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("one.txt");
        fs::write(&file, b"contents").expect("write");

        let scanner = Scanner::new(1);
        let record = scanner.stat_record(&file).await.expect("stat");
        assert!(record.is_file());
        assert_eq!(record.size, 8);
        assert!(record.digest.is_some());
        assert_eq!(record.digest_algo, Some(DigestAlgorithm::Blake3));
    }

    #[tokio::test]
    async fn changing_algorithm_clears_the_cache() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("x.bin"), b"x").expect("write");

        let mut scanner = Scanner::new(1);
        let cancel = CancellationToken::new();
        scanner.scan(&cancel, temp.path()).await.expect("scan");
        assert_eq!(scanner.cache_stats().0, 1);

        scanner.set_digest_algorithm(DigestAlgorithm::Sha256);
        assert_eq!(scanner.cache_stats().0, 0);
    }
}
