use super::StrongDigest;

/// Streaming BLAKE3 hasher, the engine's default strong digest.
#[derive(Clone, Debug)]
pub struct Blake3 {
    inner: blake3::Hasher,
}

impl Default for Blake3 {
    fn default() -> Self {
        Self::new()
    }
}

impl Blake3 {
    /// Creates a hasher with an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Feeds additional bytes into the digest state.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalises the digest and returns the 256-bit BLAKE3 output.
    #[must_use]
    pub fn finalize(self) -> [u8; 32] {
        *self.inner.finalize().as_bytes()
    }

    /// Convenience helper that computes the BLAKE3 digest for `data` in one
    /// shot.
    #[must_use]
    pub fn digest(data: &[u8]) -> [u8; 32] {
        <Self as StrongDigest>::digest(data)
    }
}

impl StrongDigest for Blake3 {
    type Digest = [u8; 32];
    const DIGEST_LEN: usize = 32;

    fn new() -> Self {
        Blake3::new()
    }

    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(self) -> Self::Digest {
        *self.inner.finalize().as_bytes()
    }
}
