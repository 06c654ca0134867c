//! Conflict detection and resolution between source and destination records.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::task;

use crate::config::{ConflictConfig, DEFAULT_BACKUP_DIR};
use crate::copier::{CopyError, FileCopier};
use relay_walk::{CancellationToken, FileRecord};

/// Time difference above which the smart strategy trusts the newer side.
const SMART_TIME_THRESHOLD: Duration = Duration::from_secs(60);

/// Size difference above which the smart strategy trusts the larger side.
const SMART_SIZE_THRESHOLD: u64 = 1024;

/// How a conflict between two records manifests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConflictKind {
    /// The two sides disagree on byte length.
    SizesDiffer,
    /// The two sides disagree on modification time.
    ModTimesDiffer,
    /// Both sides carry digests and they disagree.
    DigestsDiffer,
    /// Both sides changed since they were last reconciled.
    BothModified,
}

impl ConflictKind {
    /// Human-readable description of the divergence.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::SizesDiffer => "file sizes differ",
            Self::ModTimesDiffer => "modification times differ",
            Self::DigestsDiffer => "content digests differ",
            Self::BothModified => "both files modified",
        }
    }
}

/// A divergence detected between two records for the same relative path.
#[derive(Clone, Debug)]
pub struct ConflictDescriptor {
    /// Path relative to both roots.
    pub relative_path: PathBuf,
    /// The source side's record.
    pub source: FileRecord,
    /// The destination side's record.
    pub destination: FileRecord,
    /// How the records disagree.
    pub kind: ConflictKind,
}

/// Action selected for a conflict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// Overwrite the destination with the source version.
    UseSource,
    /// Keep the destination version untouched.
    UseDestination,
    /// Leave the file alone entirely.
    Skip,
    /// Back up the destination, then overwrite with the source version.
    BackupThenUseSource,
    /// Reserved for content-aware merging; currently treated as proceeding
    /// with the source version without counting a resolution.
    Merge,
}

/// Strategy applied to detected conflicts.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Pick the side with the later modification time; ties prefer source.
    #[default]
    Newest,
    /// Always use the source version.
    Source,
    /// Always keep the destination version.
    Destination,
    /// Delegate each conflict to the interactive callback.
    Interactive,
    /// Prefer a clearly newer side, then a clearly larger side, then fall
    /// back to newest.
    Smart,
    /// Never touch conflicting files.
    Skip,
}

/// Outcome of an interactive prompt.
#[derive(Clone, Debug)]
pub struct InteractiveDecision {
    /// Action for the conflict at hand.
    pub resolution: Resolution,
    /// When set, the named strategy replaces interactive prompting for the
    /// remainder of the run.
    pub apply_to_all: Option<ConflictStrategy>,
}

/// Blocking callback consulted by the interactive strategy.
pub type InteractiveCallback =
    Arc<dyn Fn(&ConflictDescriptor) -> io::Result<InteractiveDecision> + Send + Sync>;

/// Resolves conflicts according to a configured strategy, optionally taking
/// timestamped backups before the destination is overwritten.
pub struct ConflictResolver {
    strategy: Mutex<ConflictStrategy>,
    backup: bool,
    backup_dir: PathBuf,
    callback: Mutex<Option<InteractiveCallback>>,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategy", &self.strategy)
            .field("backup", &self.backup)
            .field("backup_dir", &self.backup_dir)
            .finish_non_exhaustive()
    }
}

impl ConflictResolver {
    /// Creates a resolver from the conflict section of the configuration.
    #[must_use]
    pub fn new(config: &ConflictConfig) -> Self {
        Self {
            strategy: Mutex::new(config.strategy),
            backup: config.backup,
            backup_dir: config
                .backup_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            callback: Mutex::new(None),
        }
    }

    /// Installs the blocking callback used by the interactive strategy.
    pub fn set_interactive_callback(&self, callback: InteractiveCallback) {
        let mut slot = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(callback);
    }

    /// Reports whether backups are taken before use-source actions.
    #[must_use]
    pub const fn backup_enabled(&self) -> bool {
        self.backup
    }

    /// The strategy currently in effect. Interactive runs may promote a
    /// different strategy mid-run via apply-to-all.
    #[must_use]
    pub fn strategy(&self) -> ConflictStrategy {
        *self.strategy.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Detects whether two records for the same relative path diverge.
    ///
    /// Checks run in a fixed order and the first hit wins: sizes, then
    /// modification times, then digests (only when both sides carry one).
    #[must_use]
    pub fn detect(
        relative_path: &Path,
        source: &FileRecord,
        destination: &FileRecord,
    ) -> Option<ConflictDescriptor> {
        let kind = if source.size != destination.size {
            ConflictKind::SizesDiffer
        } else if source.modified != destination.modified {
            ConflictKind::ModTimesDiffer
        } else {
            match (&source.digest, &destination.digest) {
                (Some(a), Some(b)) if a != b => ConflictKind::DigestsDiffer,
                _ => return None,
            }
        };

        Some(ConflictDescriptor {
            relative_path: relative_path.to_path_buf(),
            source: source.clone(),
            destination: destination.clone(),
            kind,
        })
    }

    /// Decides how to act on a conflict according to the configured
    /// strategy.
    pub async fn resolve(&self, conflict: &ConflictDescriptor) -> Result<Resolution, ResolveError> {
        let strategy = self.strategy();
        let resolution = match strategy {
            ConflictStrategy::Interactive => return self.resolve_interactively(conflict).await,
            ConflictStrategy::Newest => resolve_by_newest(conflict),
            ConflictStrategy::Source => Resolution::UseSource,
            ConflictStrategy::Destination => Resolution::UseDestination,
            ConflictStrategy::Smart => resolve_smart(conflict),
            ConflictStrategy::Skip => Resolution::Skip,
        };

        tracing::debug!(
            path = %conflict.relative_path.display(),
            kind = conflict.kind.describe(),
            ?strategy,
            ?resolution,
            "resolved conflict"
        );

        Ok(resolution)
    }

    async fn resolve_interactively(
        &self,
        conflict: &ConflictDescriptor,
    ) -> Result<Resolution, ResolveError> {
        let callback = {
            let slot = self.callback.lock().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        let Some(callback) = callback else {
            return Err(ResolveError::MissingCallback);
        };

        let conflict = conflict.clone();
        let decision = task::spawn_blocking(move || callback(&conflict))
            .await
            .map_err(|error| ResolveError::Prompt(io::Error::other(error)))?
            .map_err(ResolveError::Prompt)?;

        if let Some(promoted) = decision.apply_to_all {
            let mut strategy = self.strategy.lock().unwrap_or_else(|e| e.into_inner());
            *strategy = promoted;
            tracing::info!(?promoted, "promoted conflict strategy for remainder of run");
        }

        Ok(decision.resolution)
    }

    /// Copies the destination file into the backup directory before it is
    /// overwritten. Returns the backup's path, or `None` when backups are
    /// disabled.
    pub async fn backup(
        &self,
        cancel: &CancellationToken,
        destination: &Path,
    ) -> Result<Option<PathBuf>, CopyError> {
        if !self.backup {
            return Ok(None);
        }

        let file_name = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let backup_path = self
            .backup_dir
            .join(format!("{file_name}.{timestamp}.backup"));

        // Backups take the buffered path; there is no point burning the
        // zero-copy budget on them.
        let copier = FileCopier::new().use_zero_copy(false);
        copier.copy_file(cancel, destination, &backup_path).await?;

        tracing::debug!(
            original = %destination.display(),
            backup = %backup_path.display(),
            "created pre-overwrite backup"
        );

        Ok(Some(backup_path))
    }
}

fn resolve_by_newest(conflict: &ConflictDescriptor) -> Resolution {
    if conflict.source.modified > conflict.destination.modified {
        Resolution::UseSource
    } else if conflict.destination.modified > conflict.source.modified {
        Resolution::UseDestination
    } else {
        // Equal times prefer the source; mirrors stay deterministic.
        Resolution::UseSource
    }
}

fn resolve_smart(conflict: &ConflictDescriptor) -> Resolution {
    let source = &conflict.source;
    let destination = &conflict.destination;

    if let Ok(ahead) = source.modified.duration_since(destination.modified) {
        if ahead > SMART_TIME_THRESHOLD {
            return Resolution::UseSource;
        }
    }
    if let Ok(behind) = destination.modified.duration_since(source.modified) {
        if behind > SMART_TIME_THRESHOLD {
            return Resolution::UseDestination;
        }
    }

    if source.size > destination.size + SMART_SIZE_THRESHOLD {
        return Resolution::UseSource;
    }
    if destination.size > source.size + SMART_SIZE_THRESHOLD {
        return Resolution::UseDestination;
    }

    resolve_by_newest(conflict)
}

/// Errors produced while resolving a conflict.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The interactive strategy is configured but no callback is installed.
    #[error("interactive strategy configured without a callback")]
    MissingCallback,
    /// The interactive callback failed to produce a decision.
    #[error("interactive prompt failed: {0}")]
    Prompt(#[source] io::Error),
}
