//! Hashing utilities for vdisk
//!
//! Object digests (SHA-1 over object contents) are what peers compare
//! during recovery; the name hash seeds VDI id allocation.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Length of an object digest in bytes
pub const DIGEST_LEN: usize = 20;

/// SHA-1 digest of an object's contents
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDigest([u8; DIGEST_LEN]);

impl ObjectDigest {
    /// Digest `data` in one shot
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    /// Raw digest bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Verify `data` against this digest
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl From<[u8; DIGEST_LEN]> for ObjectDigest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for ObjectDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectDigest({})", hex::encode(self.0))
    }
}

impl fmt::Display for ObjectDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Streaming digest calculator
///
/// Stores that read objects in pieces feed each piece through
/// [`DigestCalculator::update`].
#[derive(Default)]
pub struct DigestCalculator {
    state: Sha1,
}

impl DigestCalculator {
    /// Create a new calculator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more data
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Finalize and return the digest
    #[must_use]
    pub fn finalize(self) -> ObjectDigest {
        ObjectDigest(self.state.finalize().into())
    }
}

/// Hash a VDI name into a starting point for id allocation
#[inline]
#[must_use]
pub fn name_hash(name: &str) -> u64 {
    xxhash_rust::xxh64::xxh64(name.as_bytes(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_known_value() {
        let digest = ObjectDigest::compute(b"abc");
        assert_eq!(
            digest.to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_digest_verify() {
        let data = b"hello, world!";
        let digest = ObjectDigest::compute(data);

        assert!(digest.verify(data));
        assert!(!digest.verify(b"hello, world?"));
    }

    #[test]
    fn test_streaming_calculator() {
        let expected = ObjectDigest::compute(b"hello, world!");

        let mut calc = DigestCalculator::new();
        calc.update(b"hello, ");
        calc.update(b"world!");

        assert_eq!(calc.finalize(), expected);
    }

    #[test]
    fn test_name_hash_is_stable() {
        assert_eq!(name_hash("disk0"), name_hash("disk0"));
        assert_ne!(name_hash("disk0"), name_hash("disk1"));
    }
}
