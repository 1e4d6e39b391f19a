//! Language-model access. Provider selection, HTTP backend, and the model-candidate chain.

mod client;
mod error;

pub mod anthropic;
pub mod openai;

pub use client::{ApiClient, ApiClientBuilder};
pub use error::LlmError;

use crate::fallback::{Candidates, Walk};
use crate::prompt::Prompt;
use tracing::{debug, warn};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Anything that turns a prompt into text.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;
}

/// Supported API vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
        }
    }

    pub fn api_key_var(self) -> &'static str {
        match self {
            Provider::OpenAi => openai::API_KEY_VAR,
            Provider::Anthropic => anthropic::API_KEY_VAR,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => openai::DEFAULT_MODEL,
            Provider::Anthropic => anthropic::DEFAULT_MODEL,
        }
    }

    /// Models tried after the selected one when it is not found.
    pub fn default_fallback_models(self) -> Vec<String> {
        match self {
            Provider::OpenAi => Vec::new(),
            Provider::Anthropic => anthropic::FALLBACK_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => openai::DEFAULT_BASE_URL,
            Provider::Anthropic => anthropic::DEFAULT_BASE_URL,
        }
    }

    fn path(self) -> &'static str {
        match self {
            Provider::OpenAi => openai::PATH,
            Provider::Anthropic => anthropic::PATH,
        }
    }
}

/// Parse a provider name (case-insensitive).
pub fn parse_provider(s: &str) -> Result<Provider, String> {
    match s.to_lowercase().as_str() {
        "openai" | "gpt" => Ok(Provider::OpenAi),
        "anthropic" | "claude" => Ok(Provider::Anthropic),
        _ => Err(format!(
            "Invalid provider: '{}'. Use 'openai' or 'anthropic'.",
            s
        )),
    }
}

/// Sends one prompt to one named model.
pub trait ChatBackend: Send + Sync {
    fn send(&self, model: &str, prompt: &Prompt) -> Result<String, LlmError>;
}

impl<T: ChatBackend + ?Sized> ChatBackend for std::sync::Arc<T> {
    fn send(&self, model: &str, prompt: &Prompt) -> Result<String, LlmError> {
        (**self).send(model, prompt)
    }
}

/// [ChatBackend] over HTTP for a given provider.
pub struct HttpBackend {
    provider: Provider,
    client: ApiClient,
    api_key: String,
    base_url: String,
    temperature: f32,
}

impl HttpBackend {
    pub fn new(provider: Provider, client: ApiClient, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            client,
            api_key: api_key.into(),
            base_url: provider.default_base_url().to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Read the API key from the provider's environment variable.
    pub fn from_env(provider: Provider, client: ApiClient) -> Result<Self, LlmError> {
        let var = provider.api_key_var();
        let key = std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey { var })?;
        Ok(Self::new(provider, client, key))
    }

    /// Override the API origin (e.g. a proxy). Trailing slashes are ignored.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.provider.path())
    }
}

impl ChatBackend for HttpBackend {
    fn send(&self, model: &str, prompt: &Prompt) -> Result<String, LlmError> {
        let url = self.endpoint();
        debug!(provider = self.provider.name(), model, url = %url, max_tokens = prompt.max_tokens, "sending prompt");
        let sent = match self.provider {
            Provider::OpenAi => {
                let auth = format!("Bearer {}", self.api_key);
                self.client.post_json(
                    &url,
                    &[("authorization", auth.as_str())],
                    &openai::request_body(model, prompt, self.temperature),
                )
            }
            Provider::Anthropic => self.client.post_json(
                &url,
                &[
                    ("x-api-key", self.api_key.as_str()),
                    ("anthropic-version", anthropic::API_VERSION),
                ],
                &anthropic::request_body(model, prompt, self.temperature),
            ),
        };
        let response = sent.map_err(|e| LlmError::Network {
            url: url.clone(),
            source: e,
        })?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| LlmError::BodyRead { source: e })?;
        if status.as_u16() == 404 {
            return Err(LlmError::ModelNotFound {
                model: model.to_string(),
            });
        }
        if !status.is_success() {
            return Err(LlmError::HttpStatus {
                provider: self.provider.name(),
                status: status.as_u16(),
                body,
            });
        }
        let text = match self.provider {
            Provider::OpenAi => openai::parse_response(&body)?,
            Provider::Anthropic => anthropic::parse_response(&body)?,
        };
        debug!(model, chars = text.len(), "received completion");
        Ok(text)
    }
}

/// The selected model followed by fallbacks. Advances only when a model is not found.
pub struct ModelChain {
    backend: Box<dyn ChatBackend>,
    models: Candidates<String>,
}

impl ModelChain {
    /// Build a chain from the selected model and its fallbacks. Duplicates are dropped.
    pub fn new(backend: Box<dyn ChatBackend>, selected: &str, fallbacks: &[String]) -> Self {
        let mut rest: Vec<String> = Vec::with_capacity(fallbacks.len());
        for m in fallbacks {
            if m != selected && !rest.contains(m) {
                rest.push(m.clone());
            }
        }
        Self {
            backend,
            models: Candidates::with_first(selected.to_string(), rest),
        }
    }

    pub fn models(&self) -> &[String] {
        self.models.items()
    }
}

impl LanguageModel for ModelChain {
    fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let walk = self.models.walk(
            |model| self.backend.send(model, prompt),
            LlmError::is_model_not_found,
        );
        match walk {
            Walk::Found {
                candidate,
                value,
                failures,
                ..
            } => {
                if !failures.is_empty() {
                    warn!(model = %candidate, skipped = failures.len(), "using fallback model");
                }
                Ok(value)
            }
            Walk::Halted { failure, .. } => Err(failure.error),
            Walk::Exhausted { failures } => {
                let tried = failures
                    .iter()
                    .map(|f| f.candidate.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(LlmError::NoModelAvailable { tried })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Backend that knows a fixed set of models and records every call.
    struct FakeBackend {
        known: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
        fail_with_status: Option<u16>,
    }

    impl ChatBackend for FakeBackend {
        fn send(&self, model: &str, _prompt: &Prompt) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(model.to_string());
            if let Some(status) = self.fail_with_status {
                return Err(LlmError::HttpStatus {
                    provider: "fake",
                    status,
                    body: String::new(),
                });
            }
            if self.known.contains(&model) {
                Ok(format!("from {}", model))
            } else {
                Err(LlmError::ModelNotFound {
                    model: model.to_string(),
                })
            }
        }
    }

    fn chain(known: Vec<&'static str>, status: Option<u16>) -> (ModelChain, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend {
            known,
            calls: Mutex::new(Vec::new()),
            fail_with_status: status,
        });
        let fallbacks = vec!["b".to_string(), "c".to_string()];
        (
            ModelChain::new(Box::new(backend.clone()), "a", &fallbacks),
            backend,
        )
    }

    #[test]
    fn selected_model_used_when_available() {
        let (chain, backend) = chain(vec!["a", "b"], None);
        let text = chain.complete(&Prompt::new("hi", 10)).unwrap();
        assert_eq!(text, "from a");
        assert_eq!(*backend.calls.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn falls_back_on_model_not_found() {
        let (chain, backend) = chain(vec!["c"], None);
        let text = chain.complete(&Prompt::new("hi", 10)).unwrap();
        assert_eq!(text, "from c");
        assert_eq!(*backend.calls.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn other_errors_do_not_fall_back() {
        let (chain, backend) = chain(vec!["a"], Some(500));
        let err = chain.complete(&Prompt::new("hi", 10)).unwrap_err();
        assert!(matches!(err, LlmError::HttpStatus { status: 500, .. }));
        assert_eq!(*backend.calls.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn exhausted_chain_reports_models_tried() {
        let (chain, _) = chain(vec![], None);
        match chain.complete(&Prompt::new("hi", 10)) {
            Err(LlmError::NoModelAvailable { tried }) => assert_eq!(tried, "a, b, c"),
            other => panic!("expected NoModelAvailable, got {:?}", other),
        }
    }

    #[test]
    fn chain_drops_duplicate_models() {
        let backend = HttpBackend::new(Provider::OpenAi, ApiClient::new().unwrap(), "k");
        let chain = ModelChain::new(
            Box::new(backend),
            "gpt-4",
            &["gpt-4".to_string(), "gpt-4o".to_string()],
        );
        assert_eq!(chain.models(), ["gpt-4".to_string(), "gpt-4o".to_string()]);
    }

    #[test]
    fn parse_provider_names() {
        assert_eq!(parse_provider("openai").unwrap(), Provider::OpenAi);
        assert_eq!(parse_provider("Claude").unwrap(), Provider::Anthropic);
        assert!(parse_provider("other").is_err());
    }

    #[test]
    fn base_url_override_builds_endpoint() {
        let backend = HttpBackend::new(Provider::Anthropic, ApiClient::new().unwrap(), "k")
            .base_url("http://localhost:8080/");
        assert_eq!(backend.endpoint(), "http://localhost:8080/v1/messages");
    }
}
