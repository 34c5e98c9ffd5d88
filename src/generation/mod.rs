//! Answer generation from retrieved documents.

mod error;

#[cfg(test)]
mod tests;

use std::fmt::Write as _;

use async_trait::async_trait;
use genai::Client;
use genai::chat::{ChatMessage, ChatRequest};
use tracing::{debug, instrument};

pub use error::GenerationError;

use crate::vectordb::Document;

/// Returned instead of calling the generator when retrieval finds nothing.
pub const NO_RESULTS_ANSWER: &str = "No matching documents were found for this query.

Search suggestions:
• Try broader search terms (e.g. \"education\" instead of a specific program name)
• Check the spelling of identifiers and document numbers
• Search for related topics such as \"budget\", \"appropriations\", or \"reform\"

Try rephrasing the question or using one of these broader topics.";

/// Text generation collaborator.
#[async_trait]
pub trait Generator: Send + Sync + std::fmt::Debug {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Builds the grounded prompt sent to the generator.
pub fn build_prompt(query: &str, documents: &[Document]) -> String {
    let mut prompt = String::from(
        "You are a research assistant. Answer using only the context documents below.\n\n\
         CONTEXT DOCUMENTS:\n",
    );
    for (i, doc) in documents.iter().enumerate() {
        let _ = write!(prompt, "\n[{}] ", i + 1);
        for (key, value) in &doc.metadata {
            let _ = write!(prompt, "{key}={value} ");
        }
        let _ = writeln!(prompt, "\n{}", doc.text.trim());
    }
    let _ = write!(
        prompt,
        "\nUSER QUERY: {query}\n\n\
         Start with a direct answer, cite document identifiers where relevant, \
         and say so if the documents do not cover the question.\n\nRESPONSE:"
    );
    prompt
}

/// Chat-model generator backed by `genai`.
pub struct GenaiGenerator {
    client: Client,
    model: String,
}

impl GenaiGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::default(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for GenaiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenaiGenerator")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Generator for GenaiGenerator {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)]);
        let response = self.client.exec_chat(&self.model, request, None).await?;

        let text = response.first_text().unwrap_or_default().trim().to_string();
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        debug!(answer_len = text.len(), "Generation complete");
        Ok(text)
    }
}

pub use mock::MockGenerator;

mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{GenerationError, Generator};

    /// Generator that echoes the prompt's query. Backs `RAGLINE_MOCK_PROVIDER`
    /// and the test suites.
    #[derive(Debug, Default)]
    pub struct MockGenerator {
        calls: AtomicUsize,
        fail_next: AtomicUsize,
        latency: Mutex<Option<Duration>>,
        last_prompt: Mutex<Option<String>>,
    }

    impl MockGenerator {
        pub fn new() -> Self {
            Self::default()
        }

        /// The next `n` calls fail with a transient error.
        pub fn fail_next(&self, n: usize) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock() = Some(latency);
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.last_prompt.lock().clone()
        }
    }

    #[async_trait]
    impl Generator for MockGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock() = Some(prompt.to_string());

            let latency = *self.latency.lock();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(GenerationError::Provider {
                    reason: "injected generation failure".to_string(),
                });
            }

            let query = prompt
                .lines()
                .find_map(|line| line.strip_prefix("USER QUERY: "))
                .unwrap_or(prompt);
            Ok(format!("Mock response for: {query}"))
        }
    }
}
