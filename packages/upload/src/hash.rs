//! SHA-256 fingerprints for chunk payloads.
//!
//! The whole-file digest is accumulated by [`crate::chunk::ChunkSource`]
//! while chunks are read, so the file is never read twice.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
