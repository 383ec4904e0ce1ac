//! Stable key hashing onto the ring.

use sha2::{Digest, Sha256};

/// Hashes arbitrary bytes onto the 32-bit ring.
///
/// Takes the first four bytes of a SHA-256 digest, big-endian, so every
/// process agrees on placement regardless of platform or build.
#[must_use]
pub fn stable_hash(bytes: &[u8]) -> u32 {
    let digest = Sha256::digest(bytes);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
