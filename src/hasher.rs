use crc::{Algorithm, Crc};

use crate::record::WordId;

pub const CRC_64_ECMA: Algorithm<u64> = crc::CRC_64_ECMA_182;

/// Hashes n-gram keys into the 64-bit probe hints consumed by the counting
/// block. The block itself never hashes: equality there is byte-wise, so
/// hash quality only affects probe length, never correctness.
pub struct KeyHasher {
    crc64: Crc<u64>,
}

impl KeyHasher {
    pub fn new() -> Self {
        Self {
            crc64: Crc::<u64>::new(&CRC_64_ECMA),
        }
    }

    /// Returns the probe hint for an N-word key.
    pub fn hash(&self, key: &[WordId]) -> u64 {
        let mut digest = self.crc64.digest();
        for word in key {
            digest.update(&word.to_le_bytes());
        }
        digest.finalize()
    }
}

impl Default for KeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = KeyHasher::new();
        assert_eq!(hasher.hash(&[1, 2, 3]), hasher.hash(&[1, 2, 3]));
    }

    #[test]
    fn test_hash_depends_on_order_and_content() {
        let hasher = KeyHasher::new();
        assert_ne!(hasher.hash(&[1, 2, 3]), hasher.hash(&[3, 2, 1]));
        assert_ne!(hasher.hash(&[1, 2, 3]), hasher.hash(&[1, 2, 4]));
    }
}
