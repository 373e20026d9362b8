//! Hashing helpers

use crate::hash::Hash;
use blake2::{digest::consts::U32, Blake2b, Digest};

/// Blake2b-256 over the concatenation of `parts`
pub fn blake2b_256(parts: &[&[u8]]) -> Hash<32> {
    let mut hasher = Blake2b::<U32>::new();
    for part in parts {
        hasher.update(part);
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Hash::new(bytes)
}
