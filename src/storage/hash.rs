//! Byte-String Hashing
//!
//! The index stores a caller-computed 64-bit hash code with every entry.
//! This is the function the key/value layer uses for byte-string keys.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash of `data`.
///
/// Deterministic across runs and platforms, which keeps slot placement
/// reproducible in tests. Not resistant to deliberately colliding keys.
#[inline]
pub fn hash_bytes(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}
