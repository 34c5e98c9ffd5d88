//! Result cache: exact and near-duplicate answers for previously seen queries.
//!
//! Lookups try the exact fingerprint key first (a single map probe). Only when
//! that misses and a similarity threshold is configured does the cache ask for
//! the fingerprint's embedding and scan live entries by cosine similarity.
//! The map sits behind an `RwLock`: lookups share it, while insert, eviction,
//! sweep, and clear take it exclusively.

pub mod types;


use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

pub use types::{
    CacheEntry, CacheHit, CacheStats, CacheStatus, HitKind, LookupResult, QueryAnswer,
    ResultCacheConfig,
};

use crate::clock::SharedClock;
use crate::embedding::Vector;
use crate::fingerprint::{Fingerprint, QueryEmbedder};
use crate::hashing::{CacheKey, short_key};

/// Scores within this distance count as equal for tie-breaking.
const SCORE_EPSILON: f32 = 1e-6;

/// Cosine similarity of two vectors; `None` when dimensions differ, either is
/// empty or zero, or the score is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let score = dot_product / (norm_a * norm_b);
    score.is_finite().then_some(score)
}

#[derive(Default)]
struct Counters {
    exact_hits: AtomicU64,
    similar_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// In-memory answer cache with TTL, LRU-style eviction, and similarity lookup.
pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    config: ResultCacheConfig,
    clock: SharedClock,
    counters: Counters,
}

impl ResultCache {
    pub fn new(config: ResultCacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ResultCacheConfig {
        &self.config
    }

    /// Exact lookup followed, on a miss, by a similarity lookup.
    #[instrument(skip_all, fields(key = %fp.short_key()))]
    pub async fn lookup<E: QueryEmbedder>(&self, fp: &Fingerprint, embedder: &E) -> LookupResult {
        if let Some(hit) = self.lookup_exact(fp) {
            return LookupResult::Hit(hit);
        }
        match self.lookup_similar(fp, embedder).await {
            Some(hit) => LookupResult::Hit(hit),
            None => LookupResult::Miss,
        }
    }

    /// Exact key probe. Counts hits only; the similarity stage counts misses.
    pub fn lookup_exact(&self, fp: &Fingerprint) -> Option<CacheHit> {
        let now = self.clock.now();
        let entry = self.touch(fp.key(), now)?;
        self.counters.exact_hits.fetch_add(1, Ordering::Relaxed);
        debug!(hit_kind = "exact", hit_count = entry.hit_count, "Result cache hit");
        Some(CacheHit {
            entry,
            kind: HitKind::Exact,
        })
    }

    /// Near-duplicate lookup. Embedding failures and dimension mismatches are
    /// logged and treated as a miss.
    pub async fn lookup_similar<E: QueryEmbedder>(
        &self,
        fp: &Fingerprint,
        embedder: &E,
    ) -> Option<CacheHit> {
        let Some(threshold) = self.config.similarity_threshold else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if self.is_empty() {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let embedding = match fp.embedding_with(embedder).await {
            Ok(embedding) => embedding.clone(),
            Err(e) => {
                warn!(error = %e, "Embedding unavailable for similarity lookup, treating as miss");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let now = self.clock.now();
        let best = self.best_match(&embedding, threshold, now);

        let hit = best.and_then(|(key, score)| {
            let entry = self.touch(&key, now)?;
            Some(CacheHit {
                entry,
                kind: HitKind::Similar { score },
            })
        });

        match &hit {
            Some(hit) => {
                self.counters.similar_hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    hit_kind = "similar",
                    score = ?hit.kind,
                    matched = %short_key(&hit.entry.key),
                    "Result cache hit"
                );
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        hit
    }

    /// Highest-scoring live entry at or above `threshold`; equal scores go to
    /// the most recently created entry.
    fn best_match(&self, query: &[f32], threshold: f32, now: Instant) -> Option<(CacheKey, f32)> {
        let entries = self.entries.read();
        let mut best: Option<(CacheKey, f32, Instant)> = None;
        let mut mismatched = 0usize;

        for entry in entries.values().filter(|e| e.is_live(now)) {
            let Some(candidate) = entry.embedding.as_deref() else {
                continue;
            };
            let Some(score) = cosine_similarity(query, candidate) else {
                mismatched += 1;
                continue;
            };
            if score < threshold {
                continue;
            }

            let better = match &best {
                None => true,
                Some((_, best_score, best_created)) => {
                    score > best_score + SCORE_EPSILON
                        || ((score - best_score).abs() <= SCORE_EPSILON
                            && entry.created_at > *best_created)
                }
            };
            if better {
                best = Some((entry.key, score, entry.created_at));
            }
        }

        if mismatched > 0 {
            debug!(mismatched, "Skipped entries with incompatible embeddings");
        }
        best.map(|(key, score, _)| (key, score))
    }

    /// Marks a live entry as accessed and returns a snapshot of it.
    fn touch(&self, key: &CacheKey, now: Instant) -> Option<CacheEntry> {
        {
            let entries = self.entries.read();
            if !entries.get(key).is_some_and(|e| e.is_live(now)) {
                return None;
            }
        }

        let mut entries = self.entries.write();
        let entry = entries.get_mut(key).filter(|e| e.is_live(now))?;
        entry.last_accessed_at = now;
        entry.hit_count += 1;
        Some(entry.clone())
    }

    /// Stores `value` under the fingerprint's key, replacing any previous entry.
    #[instrument(skip_all, fields(key = %fp.short_key()))]
    pub fn insert(&self, fp: &Fingerprint, value: QueryAnswer, embedding: Option<Vector>) {
        let now = self.clock.now();
        let key = *fp.key();
        let entry = CacheEntry {
            key,
            normalized: fp.normalized().to_string(),
            value,
            embedding: embedding.or_else(|| fp.embedding().cloned()),
            created_at: now,
            expires_at: now + self.config.ttl,
            last_accessed_at: now,
            hit_count: 0,
        };

        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            self.make_room(&mut entries, now);
        }
        entries.insert(key, entry);
    }

    fn make_room(&self, entries: &mut HashMap<CacheKey, CacheEntry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let expired = before - entries.len();

        let mut evicted = 0u64;
        while entries.len() >= self.config.max_entries.max(1) {
            let victim = entries
                .values()
                .min_by_key(|e| (e.last_accessed_at, e.hit_count))
                .map(|e| e.key);
            match victim {
                Some(key) => {
                    entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }

        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        debug!(expired, evicted, "Made room in result cache");
    }

    /// Removes every entry atomically with respect to lookups.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write();
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    /// Drops expired entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let exact_hits = self.counters.exact_hits.load(Ordering::Relaxed);
        let similar_hits = self.counters.similar_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = exact_hits + similar_hits + misses;

        CacheStats {
            size: self.len(),
            max_entries: self.config.max_entries,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (exact_hits + similar_hits) as f64 / lookups as f64
            },
            ttl_secs: self.config.ttl.as_secs(),
            exact_hits,
            similar_hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            similarity_threshold: self.config.similarity_threshold,
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Shared handle to a [`ResultCache`].
#[derive(Clone, Debug)]
pub struct ResultCacheHandle {
    inner: Arc<ResultCache>,
}

impl ResultCacheHandle {
    pub fn new(config: ResultCacheConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(ResultCache::new(config, clock)),
        }
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::ops::Deref for ResultCacheHandle {
    type Target = ResultCache;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
