//! Single-file copying with a zero-copy fast path and rollback on failure.

use std::fs::{File, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::task;

use crate::zero_copy::{self, ZeroCopyOutcome};
use relay_walk::CancellationToken;

/// Default buffer size for the buffered copy path (64 KiB).
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Smallest accepted copy buffer.
const MIN_COPY_BUFFER_SIZE: usize = 4096;

/// Mode used for intermediate destination directories.
const INTERMEDIATE_DIR_MODE: u32 = 0o750;

/// Builder-style single-file copier.
///
/// The copier transfers exactly one regular file (or creates one directory)
/// per call; tree traversal belongs to the orchestrator. On success the
/// destination has the source's byte length, has been flushed with `fsync`,
/// and carries the source's permission bits and modification time when
/// preservation is enabled. On any failure after destination creation has
/// begun, the partial destination is removed before the error is returned.
#[derive(Clone, Debug)]
pub struct FileCopier {
    buffer_size: usize,
    use_zero_copy: bool,
    preserve_permissions: bool,
    preserve_times: bool,
}

impl Default for FileCopier {
    fn default() -> Self {
        Self::new()
    }
}

impl FileCopier {
    /// Creates a copier with the default buffer, zero-copy enabled, and
    /// metadata preservation on.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            use_zero_copy: true,
            preserve_permissions: true,
            preserve_times: true,
        }
    }

    /// Returns the configured buffer size.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Sets the buffered-path chunk size. Values below 4 KiB are raised to
    /// 4 KiB; zero selects the default.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = if size == 0 {
            DEFAULT_COPY_BUFFER_SIZE
        } else {
            size.max(MIN_COPY_BUFFER_SIZE)
        };
        self
    }

    /// Enables or disables the kernel zero-copy fast path.
    #[must_use]
    pub const fn use_zero_copy(mut self, enable: bool) -> Self {
        self.use_zero_copy = enable;
        self
    }

    /// Enables or disables permission preservation.
    #[must_use]
    pub const fn preserve_permissions(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }

    /// Enables or disables modification-time preservation.
    #[must_use]
    pub const fn preserve_times(mut self, preserve: bool) -> Self {
        self.preserve_times = preserve;
        self
    }

    /// Copies `source` to `destination`, returning the bytes written.
    ///
    /// A directory source creates `destination` as a directory (no
    /// recursion). The transfer runs on the blocking pool; cancellation is
    /// checked at every chunk boundary.
    pub async fn copy_file(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
    ) -> Result<u64, CopyError> {
        let copier = self.clone();
        let cancel = cancel.clone();
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        task::spawn_blocking(move || copier.copy_file_blocking(&cancel, &source, &destination))
            .await?
    }

    fn copy_file_blocking(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
    ) -> Result<u64, CopyError> {
        let metadata = std::fs::metadata(source).with_path(source)?;

        if metadata.is_dir() {
            self.copy_directory_blocking(destination, &metadata)?;
            return Ok(0);
        }

        self.copy_regular_blocking(cancel, source, destination, &metadata)
    }

    fn copy_regular_blocking(
        &self,
        cancel: &CancellationToken,
        source: &Path,
        destination: &Path,
        metadata: &Metadata,
    ) -> Result<u64, CopyError> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                create_intermediate_dirs(parent).with_path(parent)?;
            }
        }

        let mut src_file = File::open(source).with_path(source)?;
        let mut dst_file = open_destination(destination, metadata).with_path(destination)?;

        // From here on the destination exists; every failure removes it.
        let written = match self.transfer(cancel, &mut src_file, &mut dst_file, metadata, source, destination)
        {
            Ok(written) => written,
            Err(error) => {
                drop(dst_file);
                remove_partial(destination);
                return Err(error);
            }
        };

        if written != metadata.len() {
            drop(dst_file);
            remove_partial(destination);
            return Err(CopyError::Incomplete {
                path: destination.to_path_buf(),
                expected: metadata.len(),
                written,
            });
        }

        if let Err(error) = dst_file.sync_all() {
            drop(dst_file);
            remove_partial(destination);
            return Err(CopyError::io(destination, error));
        }
        drop(dst_file);

        if let Err(error) = self.apply_metadata(destination, metadata) {
            remove_partial(destination);
            return Err(error);
        }

        tracing::trace!(
            source = %source.display(),
            destination = %destination.display(),
            bytes = written,
            "copied file"
        );

        Ok(written)
    }

    fn copy_directory_blocking(
        &self,
        destination: &Path,
        metadata: &Metadata,
    ) -> Result<(), CopyError> {
        create_dir_with_mode(destination, metadata).with_path(destination)?;
        self.apply_metadata(destination, metadata)
    }

    fn transfer(
        &self,
        cancel: &CancellationToken,
        src_file: &mut File,
        dst_file: &mut File,
        metadata: &Metadata,
        source: &Path,
        destination: &Path,
    ) -> Result<u64, CopyError> {
        if self.use_zero_copy {
            match zero_copy::copy(cancel, src_file, dst_file, metadata.len(), destination)? {
                ZeroCopyOutcome::Done(written) => return Ok(written),
                ZeroCopyOutcome::Fallback { copied } => {
                    if copied > 0 {
                        tracing::debug!(
                            source = %source.display(),
                            copied,
                            "zero-copy interrupted; continuing with buffered copy"
                        );
                    }
                    // The kernel primitive advances both file offsets, so
                    // the buffered loop resumes where it left off.
                    let rest = self.buffered_copy(cancel, src_file, dst_file, source, destination)?;
                    return Ok(copied + rest);
                }
            }
        }

        self.buffered_copy(cancel, src_file, dst_file, source, destination)
    }

    fn buffered_copy(
        &self,
        cancel: &CancellationToken,
        src_file: &mut File,
        dst_file: &mut File,
        source: &Path,
        destination: &Path,
    ) -> Result<u64, CopyError> {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(CopyError::Cancelled(destination.to_path_buf()));
            }

            let read = src_file.read(&mut buffer).with_path(source)?;
            if read == 0 {
                break;
            }

            let written = dst_file.write(&buffer[..read]).with_path(destination)?;
            total += written as u64;

            if written != read {
                return Err(CopyError::ShortWrite {
                    path: destination.to_path_buf(),
                    expected: read,
                    written,
                });
            }
        }

        Ok(total)
    }

    fn apply_metadata(&self, destination: &Path, metadata: &Metadata) -> Result<(), CopyError> {
        if self.preserve_permissions {
            std::fs::set_permissions(destination, metadata.permissions()).with_path(destination)?;
        }

        if self.preserve_times {
            let mtime = metadata
                .modified()
                .map(filetime::FileTime::from_system_time)
                .with_path(destination)?;
            filetime::set_file_times(destination, mtime, mtime).with_path(destination)?;
        }

        Ok(())
    }
}

fn open_destination(destination: &Path, metadata: &Metadata) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(metadata.permissions().mode());
    }
    #[cfg(not(unix))]
    let _ = metadata;
    options.open(destination)
}

fn create_intermediate_dirs(parent: &Path) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(INTERMEDIATE_DIR_MODE);
    }
    builder.create(parent)
}

fn create_dir_with_mode(destination: &Path, metadata: &Metadata) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        builder.mode(metadata.permissions().mode());
    }
    #[cfg(not(unix))]
    let _ = metadata;
    builder.create(destination)
}

fn remove_partial(destination: &Path) {
    if let Err(error) = std::fs::remove_file(destination) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                path = %destination.display(),
                %error,
                "failed to remove partial destination"
            );
        }
    }
}

/// Errors produced by the copier.
#[derive(Debug, Error)]
pub enum CopyError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The destination ended up with fewer bytes than the source.
    #[error("incomplete copy of {path}: expected {expected} bytes, wrote {written}")]
    Incomplete {
        /// Destination path.
        path: PathBuf,
        /// Bytes the source holds.
        expected: u64,
        /// Bytes actually written.
        written: u64,
    },
    /// A single write consumed fewer bytes than the preceding read.
    #[error("short write to {path}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Destination path.
        path: PathBuf,
        /// Bytes the preceding read produced.
        expected: usize,
        /// Bytes the write accepted.
        written: usize,
    },
    /// The copy was cancelled at a chunk boundary.
    #[error("copy cancelled for {0}")]
    Cancelled(PathBuf),
    /// The blocking copy task failed to run.
    #[error("copy worker failed: {0}")]
    Worker(#[from] task::JoinError),
}

impl CopyError {
    /// Creates an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Extension trait mapping `io::Result` into [`CopyError`] with path context.
pub(crate) trait IoResultExt<T> {
    /// Attaches `path` to the error, if any.
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T, CopyError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T, CopyError> {
        self.map_err(|source| CopyError::io(path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn copier_without_zero_copy() -> FileCopier {
        FileCopier::new().use_zero_copy(false)
    }

    #[tokio::test]
    async fn copies_file_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src.txt");
        let dst = temp.path().join("dst.txt");
        fs::write(&src, b"hello world").expect("write");

        let written = FileCopier::new()
            .copy_file(&CancellationToken::new(), &src, &dst)
            .await
            .expect("copy");

        assert_eq!(written, 11);
        assert_eq!(fs::read(&dst).expect("read"), b"hello world");
    }

    #[tokio::test]
    async fn buffered_path_matches_zero_copy_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &payload).expect("write");

        let cancel = CancellationToken::new();

        let dst_a = temp.path().join("zero.bin");
        FileCopier::new()
            .copy_file(&cancel, &src, &dst_a)
            .await
            .expect("zero-copy copy");

        let dst_b = temp.path().join("buffered.bin");
        copier_without_zero_copy()
            .with_buffer_size(8192)
            .copy_file(&cancel, &src, &dst_b)
            .await
            .expect("buffered copy");

        assert_eq!(fs::read(&dst_a).expect("read"), payload);
        assert_eq!(fs::read(&dst_b).expect("read"), payload);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn preserves_permissions_and_mtime() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src.txt");
        let dst = temp.path().join("dst.txt");
        fs::write(&src, b"data").expect("write");
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).expect("chmod");
        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, mtime).expect("set mtime");

        FileCopier::new()
            .copy_file(&CancellationToken::new(), &src, &dst)
            .await
            .expect("copy");

        let metadata = fs::metadata(&dst).expect("metadata");
        assert_eq!(metadata.permissions().mode() & 0o777, 0o640);
        assert_eq!(
            filetime::FileTime::from_last_modification_time(&metadata),
            mtime
        );
    }

    #[tokio::test]
    async fn creates_intermediate_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src.txt");
        let dst = temp.path().join("a/b/c/dst.txt");
        fs::write(&src, b"nested").expect("write");

        FileCopier::new()
            .copy_file(&CancellationToken::new(), &src, &dst)
            .await
            .expect("copy");

        assert_eq!(fs::read(&dst).expect("read"), b"nested");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(temp.path().join("a"))
                .expect("metadata")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o750);
        }
    }

    #[tokio::test]
    async fn cancelled_copy_leaves_no_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src.bin");
        let dst = temp.path().join("dst.bin");
        fs::write(&src, vec![7u8; 64 * 1024]).expect("write");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = copier_without_zero_copy()
            .copy_file(&cancel, &src, &dst)
            .await
            .unwrap_err();

        assert!(matches!(error, CopyError::Cancelled(_)));
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn failed_copy_removes_partial_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("missing.bin");
        let dst = temp.path().join("dst.bin");

        let error = FileCopier::new()
            .copy_file(&CancellationToken::new(), &src, &dst)
            .await
            .unwrap_err();

        assert!(matches!(error, CopyError::Io { .. }));
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn directory_source_creates_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("dir");
        let dst = temp.path().join("mirror");
        fs::create_dir(&src).expect("mkdir");

        let written = FileCopier::new()
            .copy_file(&CancellationToken::new(), &src, &dst)
            .await
            .expect("copy");

        assert_eq!(written, 0);
        assert!(dst.is_dir());
    }

    #[tokio::test]
    async fn empty_file_copies_cleanly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("empty");
        let dst = temp.path().join("empty-copy");
        fs::write(&src, b"").expect("write");

        let written = FileCopier::new()
            .copy_file(&CancellationToken::new(), &src, &dst)
            .await
            .expect("copy");

        assert_eq!(written, 0);
        assert!(dst.exists());
    }

    #[test]
    fn buffer_size_is_floored() {
        assert_eq!(FileCopier::new().with_buffer_size(1).buffer_size(), 4096);
        assert_eq!(
            FileCopier::new().with_buffer_size(0).buffer_size(),
            DEFAULT_COPY_BUFFER_SIZE
        );
    }
}
