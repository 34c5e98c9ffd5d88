//! Query fingerprints: canonical identity of a raw query.
//!
//! A [`Fingerprint`] carries the exact-match key immediately and its
//! embedding only once something asks for it, so exact cache hits never pay
//! for an embedding call.

use std::future::Future;

use thiserror::Error;
use tokio::sync::OnceCell;

use crate::embedding::{EmbeddingError, Vector};
use crate::hashing::{CacheKey, hash_query, short_key};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Reasons a raw query is rejected.
pub enum FingerprintError {
    #[error("query is empty")]
    Empty,

    #[error("query is {len} characters long, limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Source of query embeddings for lazily completing a fingerprint.
pub trait QueryEmbedder: Send + Sync {
    fn embed_query(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Vector, EmbeddingError>> + Send;
}

/// Normalized query plus its cache key and (lazily) its embedding.
#[derive(Debug)]
pub struct Fingerprint {
    normalized: String,
    key: CacheKey,
    embedding: OnceCell<Vector>,
}

impl Fingerprint {
    fn new(normalized: String) -> Self {
        let key = hash_query(&normalized);
        Self {
            normalized,
            key,
            embedding: OnceCell::new(),
        }
    }

    /// Canonical query text.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Exact-match cache key.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Short printable form of the key.
    pub fn short_key(&self) -> String {
        short_key(&self.key)
    }

    /// Returns the embedding if it has already been computed.
    pub fn embedding(&self) -> Option<&Vector> {
        self.embedding.get()
    }

    /// Returns the embedding, computing it through `embedder` on first use.
    ///
    /// Concurrent callers on the same fingerprint share one computation. A
    /// failed computation leaves the slot empty so a later call may retry.
    pub async fn embedding_with<E: QueryEmbedder>(
        &self,
        embedder: &E,
    ) -> Result<&Vector, EmbeddingError> {
        self.embedding
            .get_or_try_init(|| embedder.embed_query(&self.normalized))
            .await
    }

    /// Attaches a precomputed embedding. Has no effect if one is already set.
    pub fn with_embedding(self, vector: Vector) -> Self {
        let _ = self.embedding.set(vector);
        self
    }
}

/// Builds fingerprints from raw queries.
#[derive(Debug, Clone)]
pub struct FingerprintResolver {
    max_len: usize,
}

impl FingerprintResolver {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Validates and normalizes `raw`.
    pub fn resolve(&self, raw: &str) -> Result<Fingerprint, FingerprintError> {
        let len = raw.chars().count();
        if len > self.max_len {
            return Err(FingerprintError::TooLong {
                len,
                max: self.max_len,
            });
        }

        let normalized = normalize_query(raw);
        if normalized.is_empty() {
            return Err(FingerprintError::Empty);
        }

        Ok(Fingerprint::new(normalized))
    }
}

impl Default for FingerprintResolver {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MAX_QUERY_LEN)
    }
}

/// Case-folds and collapses all whitespace runs to a single space.
pub fn normalize_query(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

#[cfg(test)]
mod tests;
