//! Error type for language-model calls.

use thiserror::Error;

/// Failure talking to a language-model API.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key not set. Set the {var} environment variable.")]
    MissingApiKey { var: &'static str },

    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("Model '{model}' not found (HTTP 404).")]
    ModelNotFound { model: String },

    #[error("HTTP {status} from {provider} API: {body}")]
    HttpStatus {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to read response body: {source}")]
    BodyRead { source: reqwest::Error },

    #[error("Unexpected {provider} response: {reason}")]
    Decode {
        provider: &'static str,
        reason: String,
    },

    #[error("All candidate models failed: {tried}")]
    NoModelAvailable { tried: String },
}

impl LlmError {
    /// True when a different model identifier might succeed.
    pub fn is_model_not_found(&self) -> bool {
        matches!(self, LlmError::ModelNotFound { .. })
    }
}
