//! Deterministic hashing helpers for seeding per-request sampling streams.
//!
//! This module intentionally does **not** provide cryptographic guarantees; it exists so
//! that every sampling request gets its own reproducible RNG stream, independent of which
//! worker thread happens to run it.

/// Deterministic (non-crypto) stable hash over bytes.
///
/// Implementation:
/// - FNV-1a over bytes (cheap, stable across platforms)
/// - SplitMix64 finalizer (improves bit diffusion / uniformity)
#[must_use]
pub fn stable_hash64(seed: u64, bytes: &[u8]) -> u64 {
    let mut h: u64 = 14695981039346656037u64;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211u64);
    }
    splitmix64(seed ^ h)
}

/// Stable hash of a single `u64` (little-endian bytes).
#[must_use]
pub fn stable_hash64_u64(seed: u64, x: u64) -> u64 {
    stable_hash64(seed, &x.to_le_bytes())
}

/// Fold a sequence of words into one seed, order-sensitive.
#[must_use]
pub fn stream_seed(seed: u64, words: &[u64]) -> u64 {
    words
        .iter()
        .fold(splitmix64(seed), |acc, &w| stable_hash64_u64(acc, w))
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
