//! The validated configuration record consumed by the engine.
//!
//! Parsing textual configuration is an external collaborator's job; these
//! types only define the semantic fields and their defaults. Everything
//! derives `Deserialize` so a loader can hydrate a record from any format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::resolver::ConflictStrategy;
use crate::retry::RetryPolicy;
use relay_filters::FilterRules;

/// Default directory for pre-overwrite backups.
pub const DEFAULT_BACKUP_DIR: &str = ".relay-backups";

/// Top-level synchronization mode.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// One-way mirror from source to destination.
    #[default]
    Mirror,
    /// Reconciliation between two trees under the conflict policy.
    Sync,
    /// Long-running watch-and-sync.
    Watch,
}

/// A named bundle of synchronization settings; the engine consumes one
/// profile per run.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncProfile {
    /// Tree to read from.
    pub source: PathBuf,
    /// Tree to write to.
    pub destination: PathBuf,
    /// Operation the profile describes.
    pub mode: SyncMode,
    /// Worker count; zero selects the scanner's concurrency.
    pub workers: usize,
    /// Copy buffer size hint in bytes; zero selects the copier default.
    pub buffer_size: usize,
}

/// Conflict handling settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConflictConfig {
    /// Strategy applied to detected conflicts.
    pub strategy: ConflictStrategy,
    /// Take a timestamped backup of the destination before overwriting it.
    pub backup: bool,
    /// Where backups go; defaults to [`DEFAULT_BACKUP_DIR`].
    pub backup_dir: Option<PathBuf>,
}

/// Performance tuning settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceConfig {
    /// Attempt the kernel zero-copy path for regular files.
    pub use_zero_copy: bool,
    /// Memoize content digests between scans.
    pub enable_caching: bool,
    /// Digest algorithm tag; `None` keeps the scanner default (BLAKE3).
    /// Unknown tags are rejected when the engine is constructed.
    pub digest_algorithm: Option<String>,
    /// Scanner concurrency; zero selects twice the available parallelism.
    pub io_concurrency: usize,
    /// Reserved timeout for network-backed filesystems.
    pub network_timeout: Option<Duration>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            use_zero_copy: true,
            enable_caching: true,
            digest_algorithm: None,
            io_concurrency: 0,
            network_timeout: None,
        }
    }
}

/// The full configuration record consumed by
/// [`SyncEngine::with_config`](crate::SyncEngine::with_config).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Source, destination, and mode.
    pub profile: SyncProfile,
    /// Entry filtering rules applied to both scan passes.
    pub filters: FilterRules,
    /// Conflict handling.
    pub conflict: ConflictConfig,
    /// Retry budget and backoff.
    pub retry: RetryPolicy,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.profile.mode, SyncMode::Mirror);
        assert_eq!(config.profile.workers, 0);
        assert!(config.performance.use_zero_copy);
        assert!(config.performance.enable_caching);
        assert!(config.performance.digest_algorithm.is_none());
        assert!(!config.conflict.backup);
        assert_eq!(config.conflict.strategy, ConflictStrategy::Newest);
    }
}
