//! Keyless content hashing for integrity checks and audit fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Algorithm label stored with every digest.
pub const HASH_ALGORITHM: &str = "BLAKE3";

/// A content digest and when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHash {
    /// Lowercase hex digest
    pub digest: String,
    pub algorithm: String,
    pub timestamp: DateTime<Utc>,
}

impl ContentHash {
    /// Whether two hashes cover identical content, ignoring when they were taken.
    pub fn same_content(&self, other: &ContentHash) -> bool {
        self.algorithm == other.algorithm && self.digest == other.digest
    }
}

/// Hash `bytes`. No key is involved.
pub fn hash(bytes: &[u8]) -> ContentHash {
    ContentHash {
        digest: digest_hex(bytes),
        algorithm: HASH_ALGORITHM.to_string(),
        timestamp: Utc::now(),
    }
}

/// Hex digest of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = hash(b"patients");
        let b = hash(b"patients");
        assert!(a.same_content(&b));
        assert_eq!(a.digest.len(), 64);
        assert_eq!(a.algorithm, HASH_ALGORITHM);
    }

    #[test]
    fn test_hash_differs_for_different_content() {
        assert_ne!(digest_hex(b"patients"), digest_hex(b"patients "));
    }
}
