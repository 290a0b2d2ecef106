//! SHA-256 content fingerprints.
//!
//! A rescan compares the fingerprints of both sidecars against the previous
//! scan to decide whether a recorded decision still applies.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `content`.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
