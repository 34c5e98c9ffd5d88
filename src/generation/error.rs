use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation provider error: {reason}")]
    Provider { reason: String },

    #[error("generation provider returned no text")]
    EmptyResponse,
}

impl Retryable for GenerationError {
    fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Provider { .. })
    }
}

impl From<genai::Error> for GenerationError {
    fn from(e: genai::Error) -> Self {
        GenerationError::Provider {
            reason: e.to_string(),
        }
    }
}
