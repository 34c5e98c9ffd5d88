//! Text-keyed embedding cache.
//!
//! Entries are keyed by [`hash_text`] (model-namespaced, no normalization) and
//! carry their own `expires_at`, checked against the injected [`Clock`] so
//! expiry is deterministic in tests. Capacity is enforced by moka.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::sync::Cache;

use super::Vector;
use crate::clock::SharedClock;
use crate::hashing::{CacheKey, hash_text};

/// Cached embedding for one text.
#[derive(Debug, Clone)]
pub struct EmbeddingCacheEntry {
    pub text_hash: CacheKey,
    pub vector: Vector,
    pub created_at: Instant,
    pub expires_at: Instant,
}

/// Bounded, TTL'd map from text hash to embedding vector.
pub struct EmbeddingCache {
    entries: Cache<CacheKey, EmbeddingCacheEntry>,
    model: String,
    ttl: Duration,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(model: impl Into<String>, capacity: u64, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            model: model.into(),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn key_for(&self, text: &str) -> CacheKey {
        hash_text(&self.model, text)
    }

    /// Returns the vector for `text` if present and unexpired.
    pub fn get(&self, text: &str) -> Option<Vector> {
        let key = self.key_for(text);
        let now = self.clock.now();

        match self.entries.get(&key) {
            Some(entry) if now < entry.expires_at => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.vector)
            }
            Some(_) => {
                self.entries.invalidate(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `vector` for `text`, replacing any previous entry.
    pub fn insert(&self, text: &str, vector: Vector) {
        let text_hash = self.key_for(text);
        let created_at = self.clock.now();
        self.entries.insert(
            text_hash,
            EmbeddingCacheEntry {
                text_hash,
                vector,
                created_at,
                expires_at: created_at + self.ttl,
            },
        );
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<Arc<CacheKey>> = self
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.entries.invalidate(key.as_ref());
        }
        self.entries.run_pending_tasks();
        expired.len()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("model", &self.model)
            .field("entries", &self.entries.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}
