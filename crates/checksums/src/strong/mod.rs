//! Strong checksum implementations backed by well-known hash algorithms.
//!
//! The synchronization engine selects the strong digest from configuration at
//! run time. This module exposes streaming wrappers for BLAKE3 and SHA-256 so
//! higher layers can compose the desired strategy without naming the hashing
//! primitives directly.

mod blake3;
mod sha256;

pub use blake3::Blake3;
pub use sha256::Sha256;

/// Trait implemented by the strong checksum algorithms the engine supports.
///
/// Implementors provide a streaming interface: callers feed data incrementally
/// via [`Self::update`] and then obtain the final digest through
/// [`Self::finalize`]. The associated [`DIGEST_LEN`](Self::DIGEST_LEN)
/// constant exposes the byte width of the resulting hash so higher layers can
/// size buffers without hard-coding algorithm-specific knowledge.
///
/// # Examples
///
/// Compute a SHA-256 digest through the trait without depending on the
/// concrete hasher type.
///
/// ```
/// use relay_checksums::strong::{Sha256, StrongDigest};
///
/// let mut hasher = Sha256::new();
/// hasher.update(b"example");
/// let digest = hasher.finalize();
/// assert_eq!(digest.as_ref().len(), Sha256::DIGEST_LEN);
/// ```
pub trait StrongDigest: Sized {
    /// Type returned when finalising the digest.
    type Digest: AsRef<[u8]> + Copy;

    /// Length of the final digest in bytes.
    const DIGEST_LEN: usize;

    /// Creates a new hasher with an empty state.
    fn new() -> Self;

    /// Feeds additional bytes into the digest state.
    fn update(&mut self, data: &[u8]);

    /// Finalises the digest and returns the resulting hash.
    fn finalize(self) -> Self::Digest;

    /// Convenience helper that hashes `data` in a single call.
    fn digest(data: &[u8]) -> Self::Digest {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}
