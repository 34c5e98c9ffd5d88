use std::time::{Duration, Instant};

use serde::Serialize;

use crate::constants::{
    DEFAULT_RESULT_MAX_ENTRIES, DEFAULT_RESULT_TTL, DEFAULT_SIMILARITY_THRESHOLD,
    DEFAULT_SWEEP_INTERVAL,
};
use crate::embedding::Vector;
use crate::hashing::CacheKey;

/// Cache outcome of a served query, reported in the `X-Ragline-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    HitExact,
    HitSimilar,
    Miss,
}

impl CacheStatus {
    #[inline]
    pub fn as_header_value(&self) -> &'static str {
        match self {
            CacheStatus::HitExact => "HIT_EXACT",
            CacheStatus::HitSimilar => "HIT_SIMILAR",
            CacheStatus::Miss => "MISS",
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheStatus::Miss)
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_header_value())
    }
}

/// The cached payload: a generated answer and how many documents backed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub documents_found: usize,
}

/// One cached answer.
///
/// Visible only while `now < expires_at`; `expires_at > created_at` always.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub normalized: String,
    pub value: QueryAnswer,
    /// Absent entries are never similarity candidates.
    pub embedding: Option<Vector>,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
    pub hit_count: u64,
}

impl CacheEntry {
    #[inline]
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// How a hit was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitKind {
    Exact,
    Similar { score: f32 },
}

impl HitKind {
    pub fn status(&self) -> CacheStatus {
        match self {
            HitKind::Exact => CacheStatus::HitExact,
            HitKind::Similar { .. } => CacheStatus::HitSimilar,
        }
    }
}

/// A served entry (snapshot taken at lookup time).
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: CacheEntry,
    pub kind: HitKind,
}

#[derive(Debug, Clone)]
pub enum LookupResult {
    Hit(CacheHit),
    Miss,
}

impl LookupResult {
    pub fn status(&self) -> CacheStatus {
        match self {
            LookupResult::Hit(hit) => hit.kind.status(),
            LookupResult::Miss => CacheStatus::Miss,
        }
    }

    pub fn into_hit(self) -> Option<CacheHit> {
        match self {
            LookupResult::Hit(hit) => Some(hit),
            LookupResult::Miss => None,
        }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultCacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
    /// `None` disables near-duplicate lookups.
    pub similarity_threshold: Option<f32>,
    pub sweep_interval: Duration,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_RESULT_MAX_ENTRIES,
            ttl: DEFAULT_RESULT_TTL,
            similarity_threshold: Some(DEFAULT_SIMILARITY_THRESHOLD),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Admin view of the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_entries: usize,
    pub hit_rate: f64,
    pub ttl_secs: u64,
    pub exact_hits: u64,
    pub similar_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub similarity_threshold: Option<f32>,
}
