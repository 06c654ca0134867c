#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `relay_checksums` provides the content digest primitives used by the relay
//! synchronization engine to detect file-level change. Digests are computed
//! over whole files by the scanner and compared as lowercase hexadecimal
//! strings, so this crate exposes streaming hashers behind a small trait
//! together with the closed set of algorithm tags a configuration record may
//! select.
//!
//! # Design
//!
//! - [`strong::StrongDigest`] is the streaming trait implemented by
//!   [`strong::Blake3`] and [`strong::Sha256`]. Callers feed data with
//!   `update` and obtain the final digest through `finalize`, so large files
//!   never need to be resident in memory.
//! - [`DigestAlgorithm`] is the tag enum consumed by configuration. It is a
//!   closed set; parsing an unknown tag fails with
//!   [`UnknownAlgorithmError`] rather than silently substituting another
//!   hash.
//! - [`hex_digest`] renders a finalized digest in the lowercase hexadecimal
//!   form that travels inside file records.
//!
//! # Invariants
//!
//! - Both supported algorithms produce 32-byte digests; the hexadecimal
//!   rendering is therefore always 64 characters.
//! - Hashers are cheap value types created per file; selecting an algorithm
//!   never mutates global state.
//!
//! # Examples
//!
//! ```
//! use relay_checksums::strong::{Blake3, StrongDigest};
//! use relay_checksums::hex_digest;
//!
//! let mut hasher = Blake3::new();
//! hasher.update(b"hello");
//! let digest = hex_digest(hasher.finalize());
//! assert_eq!(digest.len(), 64);
//! assert_eq!(digest, hex_digest(Blake3::digest(b"hello")));
//! ```

use std::fmt;
use std::str::FromStr;

pub mod strong;

/// Renders a finalized digest as a lowercase hexadecimal string.
#[must_use]
pub fn hex_digest(digest: impl AsRef<[u8]>) -> String {
    hex::encode(digest.as_ref())
}

/// Closed set of digest algorithms a configuration record may select.
///
/// The engine compares digests only when both sides were produced by the same
/// algorithm, so the tag is carried alongside every digest in a file record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum DigestAlgorithm {
    /// BLAKE3, the default. Fast on all modern hardware.
    #[default]
    Blake3,
    /// SHA-256 for environments that require a FIPS-familiar hash.
    Sha256,
}

impl DigestAlgorithm {
    /// Returns the canonical lowercase tag for this algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }

    /// Creates a streaming hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> Hasher {
        match self {
            Self::Blake3 => Hasher::Blake3(strong::Blake3::new()),
            Self::Sha256 => Hasher::Sha256(strong::Sha256::new()),
        }
    }
}

/// Runtime-selected streaming hasher.
///
/// The algorithm set is closed, so dynamic selection is a tagged enum with a
/// single dispatch per call rather than a trait object.
#[derive(Clone, Debug)]
pub enum Hasher {
    /// BLAKE3 state.
    Blake3(strong::Blake3),
    /// SHA-256 state.
    Sha256(strong::Sha256),
}

impl Hasher {
    /// Feeds additional bytes into the digest state.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Blake3(hasher) => hasher.update(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Finalises the digest and renders it as lowercase hexadecimal.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Blake3(hasher) => hex_digest(hasher.finalize()),
            Self::Sha256(hasher) => hex_digest(hasher.finalize()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = UnknownAlgorithmError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        // "md5" is rejected deliberately: an earlier implementation accepted
        // the tag while actually computing SHA-256.
        match tag.to_ascii_lowercase().as_str() {
            "blake3" => Ok(Self::Blake3),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(UnknownAlgorithmError {
                tag: tag.to_string(),
            }),
        }
    }
}

/// Error returned when a configuration names a digest algorithm outside the
/// supported set.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown digest algorithm '{tag}' (supported: blake3, sha256)")]
pub struct UnknownAlgorithmError {
    tag: String,
}

impl UnknownAlgorithmError {
    /// Returns the tag that failed to parse.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tags_case_insensitively() {
        assert_eq!(
            "BLAKE3".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Blake3
        );
        assert_eq!(
            "sha256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
        assert_eq!(
            "Sha-256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
    }

    #[test]
    fn rejects_md5_tag() {
        let error = "md5".parse::<DigestAlgorithm>().unwrap_err();
        assert_eq!(error.tag(), "md5");
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }

    #[test]
    fn default_is_blake3() {
        assert_eq!(DigestAlgorithm::default(), DigestAlgorithm::Blake3);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for algo in [DigestAlgorithm::Blake3, DigestAlgorithm::Sha256] {
            assert_eq!(algo.to_string().parse::<DigestAlgorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn runtime_hasher_matches_direct_hashing() {
        use crate::strong::{Blake3, Sha256, StrongDigest};

        let mut hasher = DigestAlgorithm::Blake3.hasher();
        hasher.update(b"abc");
        assert_eq!(hasher.finalize_hex(), hex_digest(Blake3::digest(b"abc")));

        let mut hasher = DigestAlgorithm::Sha256.hasher();
        hasher.update(b"abc");
        assert_eq!(hasher.finalize_hex(), hex_digest(Sha256::digest(b"abc")));
    }
}
