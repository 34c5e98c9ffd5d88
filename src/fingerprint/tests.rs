use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;

struct CountingEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingEmbedder {
    fn new(fail: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail,
        }
    }
}

impl QueryEmbedder for CountingEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vector, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Provider {
                reason: "down".to_string(),
            });
        }
        Ok(Arc::from(vec![text.len() as f32, 1.0]))
    }
}

#[test]
fn test_normalize_collapses_case_and_whitespace() {
    assert_eq!(normalize_query("  Summarize   HB1\t\n"), "summarize hb1");
    assert_eq!(normalize_query("summarize hb1"), "summarize hb1");
}

#[test]
fn test_normalize_unicode_case_folding() {
    assert_eq!(normalize_query("ÉCOLE  Budget"), "école budget");
}

#[test]
fn test_equivalent_queries_share_key() {
    let resolver = FingerprintResolver::default();
    let a = resolver.resolve("Summarize HB1").unwrap();
    let b = resolver.resolve("  summarize    hb1 ").unwrap();
    assert_eq!(a.key(), b.key());
    assert_eq!(a.normalized(), b.normalized());
}

#[test]
fn test_different_queries_have_different_keys() {
    let resolver = FingerprintResolver::default();
    let a = resolver.resolve("Summarize HB1").unwrap();
    let b = resolver.resolve("Summarize HB2").unwrap();
    assert_ne!(a.key(), b.key());
}

#[test]
fn test_empty_query_rejected() {
    let resolver = FingerprintResolver::default();
    assert_eq!(resolver.resolve("").unwrap_err(), FingerprintError::Empty);
    assert_eq!(
        resolver.resolve(" \t\n ").unwrap_err(),
        FingerprintError::Empty
    );
}

#[test]
fn test_overlong_query_rejected() {
    let resolver = FingerprintResolver::new(10);
    let err = resolver.resolve("this query is too long").unwrap_err();
    assert_eq!(err, FingerprintError::TooLong { len: 22, max: 10 });
    assert!(resolver.resolve("short one").is_ok());
}

#[test]
fn test_length_limit_counts_characters_not_bytes() {
    let resolver = FingerprintResolver::new(3);
    assert!(resolver.resolve("été").is_ok());
}

#[tokio::test]
async fn test_embedding_is_computed_lazily_once() {
    let resolver = FingerprintResolver::default();
    let fp = resolver.resolve("Summarize HB1").unwrap();
    let embedder = CountingEmbedder::new(false);

    assert!(fp.embedding().is_none());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

    let first = fp.embedding_with(&embedder).await.unwrap().clone();
    let second = fp.embedding_with(&embedder).await.unwrap().clone();

    assert_eq!(first, second);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert!(fp.embedding().is_some());
}

#[tokio::test]
async fn test_failed_embedding_can_be_retried() {
    let resolver = FingerprintResolver::default();
    let fp = resolver.resolve("Summarize HB1").unwrap();

    let failing = CountingEmbedder::new(true);
    assert!(fp.embedding_with(&failing).await.is_err());
    assert!(fp.embedding().is_none());

    let working = CountingEmbedder::new(false);
    assert!(fp.embedding_with(&working).await.is_ok());
}

#[test]
fn test_with_embedding_presets_vector() {
    let resolver = FingerprintResolver::default();
    let fp = resolver
        .resolve("q")
        .unwrap()
        .with_embedding(Arc::from(vec![1.0, 0.0]));
    assert_eq!(fp.embedding().map(|v| v.len()), Some(2));
}
