use std::fmt;

use crc::{Crc, Digest, CRC_64_ECMA_182};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Incremental CRC-64 over a byte stream.
#[derive(Clone)]
pub struct Hasher {
    digest: Digest<'static, u64>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Checksum of everything written so far; the hasher keeps accepting data.
    pub fn checksum(&self) -> u64 {
        self.digest.clone().finalize()
    }

    pub fn reset(&mut self) {
        self.digest = CRC64.digest();
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot checksum of a buffer.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_checksum() {
        let mut hasher = Hasher::new();
        hasher.write(b"hello ");
        hasher.write(b"world");

        assert_eq!(
            hasher.checksum(),
            checksum(b"hello world"),
            "Incremental and single-write checksums should match"
        );
    }

    #[test]
    fn test_reset_hasher() {
        let mut hasher = Hasher::new();
        hasher.write(b"hello");
        let first = hasher.checksum();

        hasher.reset();
        hasher.write(b"hello");
        assert_eq!(first, hasher.checksum());
    }

    #[test]
    fn test_different_data_different_checksums() {
        assert_ne!(checksum(b"hello"), checksum(b"world"));
    }
}
