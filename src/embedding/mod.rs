//! Embedding computation.
//!
//! - [`provider`] defines the [`EmbeddingProvider`] seam and its adapters.
//! - [`batcher`] coalesces concurrent requests into provider batches.
//! - [`cache`] holds recently computed vectors keyed by text.

use std::sync::Arc;

/// Request batching and fan-out.
pub mod batcher;
/// Text-keyed vector cache.
pub mod cache;
mod error;
/// Provider trait and adapters.
pub mod provider;

pub use batcher::{BatcherConfig, BatcherStats, EmbeddingBatcher, EmbeddingCacheConfig, WarmReport};
pub use cache::{EmbeddingCache, EmbeddingCacheEntry};
pub use error::EmbeddingError;
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider, StubEmbeddingProvider};

#[cfg(any(test, feature = "mock"))]
pub use provider::MockEmbeddingProvider;

/// Immutable, cheaply cloned embedding vector.
pub type Vector = Arc<[f32]>;
