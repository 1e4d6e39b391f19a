//! Anthropic messages codec.

use crate::llm::error::LlmError;
use crate::prompt::Prompt;
use serde::{Deserialize, Serialize};

pub(crate) const PATH: &str = "/v1/messages";
pub(crate) const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub(crate) const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub(crate) const API_VERSION: &str = "2023-06-01";
pub(crate) const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";

/// Tried in order when the selected model is not found.
pub(crate) const FALLBACK_MODELS: [&str; 3] = [
    "claude-3-opus-20240229",
    "claude-3-haiku-20240307",
    "claude-instant-1.2",
];

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub(crate) fn request_body<'a>(
    model: &'a str,
    prompt: &'a Prompt,
    temperature: f32,
) -> MessagesRequest<'a> {
    MessagesRequest {
        model,
        max_tokens: prompt.max_tokens,
        temperature,
        system: prompt.system.as_deref(),
        messages: vec![Message {
            role: "user",
            content: &prompt.user,
        }],
    }
}

/// Concatenated text blocks.
pub(crate) fn parse_response(body: &str) -> Result<String, LlmError> {
    let response: MessagesResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Decode {
            provider: "Anthropic",
            reason: e.to_string(),
        })?;
    if response.content.is_empty() {
        return Err(LlmError::Decode {
            provider: "Anthropic",
            reason: "response has no content blocks".to_string(),
        });
    }
    let text: String = response
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();
    Ok(text.trim().to_string())
}
