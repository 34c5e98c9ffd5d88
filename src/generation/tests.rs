use super::*;
use crate::retry::Retryable;

#[test]
fn test_prompt_contains_query_and_documents() {
    let docs = vec![
        Document::new("1", "HB1 funds rural schools.", 0.9).with_metadata("bill_id", "HB1"),
        Document::new("2", "SB7 reforms property tax.", 0.7),
    ];
    let prompt = build_prompt("Summarize HB1", &docs);

    assert!(prompt.contains("USER QUERY: Summarize HB1"));
    assert!(prompt.contains("[1] bill_id=HB1"));
    assert!(prompt.contains("HB1 funds rural schools."));
    assert!(prompt.contains("[2]"));
    assert!(prompt.ends_with("RESPONSE:"));
}

#[tokio::test]
async fn test_mock_generator_echoes_query() {
    let generator = MockGenerator::new();
    let prompt = build_prompt("Summarize HB1", &[]);

    let answer = generator.generate(&prompt).await.unwrap();
    assert_eq!(answer, "Mock response for: Summarize HB1");
    assert_eq!(generator.call_count(), 1);
    assert_eq!(generator.last_prompt(), Some(prompt));
}

#[tokio::test]
async fn test_mock_generator_failure_injection() {
    let generator = MockGenerator::new();
    generator.fail_next(1);

    let err = generator.generate("x").await.unwrap_err();
    assert!(err.is_transient());
    assert!(generator.generate("x").await.is_ok());
}

#[test]
fn test_empty_response_is_not_transient() {
    assert!(!GenerationError::EmptyResponse.is_transient());
}
