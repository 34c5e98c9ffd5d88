//! Embedding providers.
//!
//! - [`HttpEmbeddingProvider`] talks to an OpenAI-compatible `/embeddings` endpoint.
//! - [`StubEmbeddingProvider`] produces deterministic vectors without a network.
//! - `MockEmbeddingProvider` (tests / `mock` feature) records calls and injects failures.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::EmbeddingError;

/// Batch embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Model identifier; namespaces the embedding cache key.
    fn model(&self) -> &str;

    /// Embeds `texts`, returning one vector per text in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible HTTP embedding client.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingProvider")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpEmbeddingProvider {
    /// Creates a client for `url` (the full `/embeddings` endpoint).
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut request = self.client.post(&self.url).json(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Embedding provider rejected batch");
            return Err(EmbeddingError::Provider {
                reason: format!("HTTP {}: {}", status, truncate(&body, 200)),
            });
        }

        let mut parsed: EmbeddingsResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);

        debug!(
            texts = texts.len(),
            vectors = parsed.data.len(),
            "Embedding batch returned"
        );

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Deterministic, network-free provider (hash-seeded unit vectors).
#[derive(Debug, Clone)]
pub struct StubEmbeddingProvider {
    dimension: usize,
}

impl StubEmbeddingProvider {
    pub const MODEL: &'static str = "stub";

    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds one text; identical texts always produce identical vectors.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut state = crate::hashing::hash_to_u64(text.as_bytes());
        let mut embedding = Vec::with_capacity(self.dimension);

        for _ in 0..self.dimension {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let value = ((state >> 32) as f32 / u32::MAX as f32) * 2.0 - 1.0;
            embedding.push(value);
        }

        normalize(&mut embedding);
        embedding
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    fn model(&self) -> &str {
        Self::MODEL
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scales `v` to unit length in place (no-op for the zero vector).
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmbeddingProvider;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{EmbeddingProvider, StubEmbeddingProvider};
    use crate::embedding::error::EmbeddingError;

    /// Recording provider with fixed vectors and failure injection.
    #[derive(Debug, Default)]
    pub struct MockEmbeddingProvider {
        fixed: Mutex<HashMap<String, Vec<f32>>>,
        poisoned: Mutex<HashSet<String>>,
        fail_next: AtomicUsize,
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
        latency: Mutex<Option<Duration>>,
        fallback: StubEmbeddingProvider,
    }

    impl MockEmbeddingProvider {
        pub fn new() -> Self {
            Self {
                fallback: StubEmbeddingProvider::new(8),
                ..Default::default()
            }
        }

        /// Returns `vector` whenever `text` is embedded.
        pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
            self.fixed.lock().insert(text.to_string(), vector);
        }

        /// Any batch containing `text` fails.
        pub fn poison(&self, text: &str) {
            self.poisoned.lock().insert(text.to_string());
        }

        pub fn clear_poison(&self) {
            self.poisoned.lock().clear();
        }

        /// The next `n` provider calls fail.
        pub fn fail_next(&self, n: usize) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        /// Delays every call by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock() = Some(latency);
        }

        /// Number of provider calls made so far.
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Every batch received, in call order.
        pub fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().clone()
        }

        /// Total texts embedded across all calls.
        pub fn texts_embedded(&self) -> usize {
            self.batches.lock().iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        fn model(&self) -> &str {
            "mock"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().push(texts.to_vec());

            let latency = *self.latency.lock();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let should_fail = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(EmbeddingError::Provider {
                    reason: "injected failure".to_string(),
                });
            }

            {
                let poisoned = self.poisoned.lock();
                if let Some(bad) = texts.iter().find(|t| poisoned.contains(*t)) {
                    return Err(EmbeddingError::Provider {
                        reason: format!("cannot embed '{}'", bad),
                    });
                }
            }

            let fixed = self.fixed.lock();
            Ok(texts
                .iter()
                .map(|t| {
                    fixed
                        .get(t)
                        .cloned()
                        .unwrap_or_else(|| self.fallback.embed_one(t))
                })
                .collect())
        }
    }
}
