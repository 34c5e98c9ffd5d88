use std::collections::HashMap;

use qdrant_client::qdrant::{PointId, ScoredPoint, Value};

use super::mock::MockVectorStore;
use super::model::Document;
use super::{VectorStore, VectorStoreError};
use crate::pool::PoolError;
use crate::retry::Retryable;

fn scored_point(id: PointId, payload: Vec<(&str, Value)>) -> ScoredPoint {
    ScoredPoint {
        id: Some(id),
        payload: payload
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<HashMap<_, _>>(),
        score: 0.87,
        ..Default::default()
    }
}

#[test]
fn test_document_from_scored_point() {
    let point = scored_point(
        PointId::from(42u64),
        vec![
            ("page_content", "HB1 funds rural schools.".into()),
            ("bill_id", "HB1".into()),
            ("session", 2024i64.into()),
        ],
    );

    let doc = Document::from_scored_point(point, "page_content").expect("document");
    assert_eq!(doc.id, "42");
    assert_eq!(doc.text, "HB1 funds rural schools.");
    assert_eq!(doc.score, 0.87);
    assert_eq!(doc.metadata.get("bill_id").map(String::as_str), Some("HB1"));
    assert_eq!(doc.metadata.get("session").map(String::as_str), Some("2024"));
    assert!(!doc.metadata.contains_key("page_content"));
}

#[test]
fn test_document_without_text_is_dropped() {
    let point = scored_point(PointId::from(1u64), vec![("bill_id", "HB1".into())]);
    assert!(Document::from_scored_point(point, "page_content").is_none());
}

#[test]
fn test_document_with_custom_text_field() {
    let point = scored_point(PointId::from(1u64), vec![("text", "body".into())]);
    let doc = Document::from_scored_point(point, "text").expect("document");
    assert_eq!(doc.text, "body");
}

#[tokio::test]
async fn test_mock_query_orders_by_similarity_and_limits() {
    let store = MockVectorStore::new();
    store.add_document("a", "about hb1", vec![1.0, 0.0]);
    store.add_document("b", "about hb2", vec![0.7, 0.7]);
    store.add_document("c", "about weather", vec![0.0, 1.0]);

    let conn = store.connect().await.unwrap();
    let docs = store.query(&conn, &[1.0, 0.1], 2).await.unwrap();

    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(docs[0].score > docs[1].score);
    assert_eq!(store.query_count(), 1);
}

#[tokio::test]
async fn test_mock_query_on_empty_store_returns_nothing() {
    let store = MockVectorStore::new();
    let conn = store.connect().await.unwrap();
    assert!(store.query(&conn, &[1.0], 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mock_failure_injection() {
    let store = MockVectorStore::new();
    store.fail_next_connects(1);
    store.fail_next_queries(1);

    assert!(store.connect().await.is_err());
    let conn = store.connect().await.unwrap();
    assert_eq!(conn.id, 0);

    let err = store.query(&conn, &[1.0], 1).await.unwrap_err();
    assert!(err.is_transient());
    assert!(store.query(&conn, &[1.0], 1).await.is_ok());

    store.set_unhealthy(true);
    assert!(store.health_check(&conn).await.is_err());
    store.set_unhealthy(false);
    assert!(store.health_check(&conn).await.is_ok());
    assert_eq!(store.health_check_count(), 2);
}

#[test]
fn test_error_transience() {
    let query = VectorStoreError::QueryFailed {
        collection: "docs".to_string(),
        message: "timeout".to_string(),
    };
    let invalid = VectorStoreError::InvalidResponse {
        message: "bad".to_string(),
    };
    let exhausted = VectorStoreError::from(PoolError::Exhausted { waited_ms: 5 });

    assert!(query.is_transient());
    assert!(!invalid.is_transient());
    assert!(!exhausted.is_transient());
    assert_eq!(exhausted.to_string(), "connection pool exhausted after waiting 5ms");
}

#[test]
fn test_query_status_classification() {
    let missing = VectorStoreError::from_query_status("docs", Some(5), "collection not found");
    let bad_dim = VectorStoreError::from_query_status("docs", Some(3), "wrong vector size");
    let precondition = VectorStoreError::from_query_status("docs", Some(9), "index not ready");
    let unavailable = VectorStoreError::from_query_status("docs", Some(14), "unavailable");
    let transport = VectorStoreError::from_query_status("docs", None, "connection reset");

    for rejected in [&missing, &bad_dim, &precondition] {
        assert!(matches!(rejected, VectorStoreError::QueryRejected { .. }));
        assert!(!rejected.is_transient());
    }
    for failed in [&unavailable, &transport] {
        assert!(matches!(failed, VectorStoreError::QueryFailed { .. }));
        assert!(failed.is_transient());
    }
    assert_eq!(
        missing.to_string(),
        "query on 'docs' rejected: collection not found"
    );
}
