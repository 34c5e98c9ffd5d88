//! BLAKE3 keys for the result cache and the embedding cache.
//!
//! The two caches hash different inputs (normalized query vs. raw text) and
//! the embedding key is additionally namespaced by model, so the key spaces
//! never overlap.

use blake3::Hasher;

/// 32-byte cache key.
pub type CacheKey = [u8; 32];

/// Hashes an already-normalized query into a result cache key.
#[inline]
pub fn hash_query(normalized: &str) -> CacheKey {
    let mut hasher = Hasher::new();
    hasher.update(b"query|");
    hasher.update(normalized.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Hashes raw text (no normalization) for the embedding cache.
#[inline]
pub fn hash_text(model: &str, text: &str) -> CacheKey {
    let mut hasher = Hasher::new();
    hasher.update(b"text|");
    hasher.update(model.as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Computes a 64-bit hash of the input, truncated from the 256-bit BLAKE3 digest.
///
/// Used for log fields and vector-store point ids, never as a cache key: at
/// 64 bits the birthday bound is ~4.3 billion items, which is fine for
/// correlation but not for correctness.
#[inline]
pub fn hash_to_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

/// Short hex prefix of a key, for log output.
pub fn short_key(key: &CacheKey) -> String {
    key[..6].iter().map(|b| format!("{:02x}", b)).collect()
}
