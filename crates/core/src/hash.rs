//! Content hashing using xxHash64

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

/// A 64-bit non-cryptographic content hash (xxHash64).
///
/// Identical bytes always hash identically; collisions are an accepted
/// practical risk. The decimal form is the wire representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(u64);

impl ContentHash {
    /// Wrap a raw 64-bit hash value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh64::xxh64(data, 0))
    }

    /// Hash a file by streaming its full contents
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub fn from_file(path: &Path) -> color_eyre::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Xxh64::new(0);
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(hasher.digest()))
    }

    /// Get the raw 64-bit value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parse the decimal wire form
    #[must_use]
    pub fn from_decimal(s: &str) -> Option<Self> {
        s.parse::<u64>().ok().map(Self)
    }
}

/// Incremental xxHash64 digest, for hashing bytes as they stream in.
pub struct Hasher {
    inner: Xxh64,
}

impl Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Xxh64::new(0) }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    #[must_use]
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.inner.digest())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
