//! Kernel file-to-file transfer for the copier's fast path.
//!
//! On Linux the copy is performed with `copy_file_range`, which moves data
//! between two file descriptors without ever surfacing it in user space. Both
//! file offsets are advanced by the kernel, so when the primitive stops
//! working mid-transfer the buffered path can resume from the current
//! position. Platforms without a supported primitive report an immediate
//! fallback.

#![allow(unsafe_code)]

use std::fs::File;
use std::path::Path;

use crate::copier::CopyError;
use relay_walk::CancellationToken;

/// Transfer chunk handed to the kernel per call (1 MiB).
#[cfg(target_os = "linux")]
const ZERO_COPY_CHUNK_SIZE: u64 = 1024 * 1024;

/// Result of a zero-copy attempt.
#[derive(Debug)]
pub(crate) enum ZeroCopyOutcome {
    /// The kernel transferred the entire file; no further work is needed.
    Done(u64),
    /// The primitive is unavailable or stopped early after `copied` bytes;
    /// the caller continues with a buffered copy from the current offsets.
    Fallback {
        /// Bytes already transferred by the kernel.
        copied: u64,
    },
}

/// Attempts a kernel copy of `length` bytes from `source` to `destination`.
///
/// Only cancellation is reported as an error; every primitive failure is a
/// fallback so the caller can transparently switch strategies.
#[cfg(target_os = "linux")]
pub(crate) fn copy(
    cancel: &CancellationToken,
    source: &File,
    destination: &File,
    length: u64,
    destination_path: &Path,
) -> Result<ZeroCopyOutcome, CopyError> {
    use std::os::fd::AsRawFd;

    let src_fd = source.as_raw_fd();
    let dst_fd = destination.as_raw_fd();
    let mut total = 0u64;

    while total < length {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled(destination_path.to_path_buf()));
        }

        let chunk = (length - total).min(ZERO_COPY_CHUNK_SIZE) as usize;
        // SAFETY: both descriptors come from live `&File` borrows and stay
        // open for the duration of the call. Null offset pointers make the
        // kernel use and advance each file's own position, which is exactly
        // what the buffered fallback resumes from.
        let transferred = unsafe {
            libc::copy_file_range(
                src_fd,
                std::ptr::null_mut(),
                dst_fd,
                std::ptr::null_mut(),
                chunk,
                0,
            )
        };

        if transferred < 0 {
            // Old kernels, cross-device pairs, and exotic filesystems all
            // land here; the buffered path picks up from `total`.
            return Ok(ZeroCopyOutcome::Fallback { copied: total });
        }
        if transferred == 0 {
            break;
        }

        total += transferred as u64;
    }

    Ok(ZeroCopyOutcome::Done(total))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn copy(
    _cancel: &CancellationToken,
    _source: &File,
    _destination: &File,
    _length: u64,
    _destination_path: &Path,
) -> Result<ZeroCopyOutcome, CopyError> {
    Ok(ZeroCopyOutcome::Fallback { copied: 0 })
}
