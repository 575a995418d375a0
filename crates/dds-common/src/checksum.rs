//! Checksum utilities for archive verification

use crate::error::{DdsError, Result};
use sha2::{Digest, Sha256};

/// Compute a SHA-256 checksum for an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that a buffer matches an expected SHA-256 checksum.
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual == expected {
        Ok(())
    } else {
        Err(DdsError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        let checksum = sha256_hex(b"hello world");
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let err = verify_checksum(b"hello world", "deadbeef").unwrap_err();
        assert!(matches!(err, DdsError::ChecksumMismatch { .. }));
    }
}
