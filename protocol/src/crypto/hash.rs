//! # Hashing Utilities
//!
//! Quill uses exactly one hash function: SHA-256, rendered as lowercase hex.
//! Block hashes travel over the wire as strings and are compared as strings,
//! so the hex form is the canonical one; raw digests are only an
//! intermediate step.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the SHA-256 digest of `data` as lowercase hex.
///
/// # Example
///
/// ```
/// use quill_protocol::crypto::sha256_hex;
///
/// let digest = sha256_hex(b"quill");
/// assert_eq!(digest.len(), 64);
/// ```
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash several byte slices as if they were concatenated, without building
/// the concatenation.
pub fn sha256_hex_multi(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
