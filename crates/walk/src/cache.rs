//! Digest memoization keyed by absolute path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Aggregate cache statistics: entry count and the sum of the cached files'
/// sizes in bytes.
pub type CacheStats = (usize, u64);

#[derive(Clone, Debug)]
struct CacheEntry {
    digest: String,
    mtime_seconds: i64,
    size: u64,
}

/// Memoization map for file digests.
///
/// Entries are keyed by absolute path and validated against the file's
/// modification time in whole seconds and its size; a mismatch on either
/// field is treated as a miss and the entry is replaced after recomputation.
/// The lock is never held across I/O.
#[derive(Debug, Default)]
pub struct DigestCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl DigestCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached digest for `path` when both validation fields
    /// match the current record.
    #[must_use]
    pub fn lookup(&self, path: &Path, mtime_seconds: i64, size: u64) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(path)?;
        (entry.mtime_seconds == mtime_seconds && entry.size == size)
            .then(|| entry.digest.clone())
    }

    /// Stores or replaces the digest for `path`.
    pub fn store(&self, path: PathBuf, digest: String, mtime_seconds: i64, size: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            path,
            CacheEntry {
                digest,
                mtime_seconds,
                size,
            },
        );
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Returns the entry count and the aggregate size of the cached files.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let total = entries.values().map(|entry| entry.size).sum();
        (entries.len(), total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hits_only_when_both_fields_match() {
        let cache = DigestCache::new();
        let path = PathBuf::from("/data/file.bin");
        cache.store(path.clone(), "abc123".to_string(), 1_000, 42);

        assert_eq!(cache.lookup(&path, 1_000, 42), Some("abc123".to_string()));
        assert_eq!(cache.lookup(&path, 1_001, 42), None);
        assert_eq!(cache.lookup(&path, 1_000, 43), None);
        assert_eq!(cache.lookup(Path::new("/other"), 1_000, 42), None);
    }

    #[test]
    fn store_replaces_existing_entries() {
        let cache = DigestCache::new();
        let path = PathBuf::from("/data/file.bin");
        cache.store(path.clone(), "old".to_string(), 1, 1);
        cache.store(path.clone(), "new".to_string(), 2, 2);

        assert_eq!(cache.lookup(&path, 1, 1), None);
        assert_eq!(cache.lookup(&path, 2, 2), Some("new".to_string()));
        assert_eq!(cache.stats(), (1, 2));
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = DigestCache::new();
        cache.store(PathBuf::from("/a"), "x".to_string(), 1, 10);
        cache.store(PathBuf::from("/b"), "y".to_string(), 1, 20);
        assert_eq!(cache.stats(), (2, 30));

        cache.clear();
        assert_eq!(cache.stats(), (0, 0));
    }
}
