//! OpenAI chat-completions codec.

use crate::llm::error::LlmError;
use crate::prompt::Prompt;
use serde::{Deserialize, Serialize};

pub(crate) const PATH: &str = "/v1/chat/completions";
pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub(crate) const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4";

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    n: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub(crate) fn request_body<'a>(
    model: &'a str,
    prompt: &'a Prompt,
    temperature: f32,
) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = prompt.system.as_deref() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &prompt.user,
    });
    ChatRequest {
        model,
        messages,
        max_tokens: prompt.max_tokens,
        n: 1,
        temperature,
    }
}

/// Text of the first choice, trimmed.
pub(crate) fn parse_response(body: &str) -> Result<String, LlmError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| LlmError::Decode {
        provider: "OpenAI",
        reason: e.to_string(),
    })?;
    let choice = response.choices.into_iter().next().ok_or_else(|| LlmError::Decode {
        provider: "OpenAI",
        reason: "response has no choices".to_string(),
    })?;
    Ok(choice.message.content.unwrap_or_default().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_model_turns_and_limits() -> Result<(), serde_json::Error> {
        let prompt = Prompt::new("Write about tides", 2000);
        let body = serde_json::to_value(request_body("gpt-4", &prompt, 0.7))?;
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["n"], 1);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Write about tides");
        Ok(())
    }

    #[test]
    fn parse_response_takes_first_choice_trimmed() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Hello.\n"}},{"message":{"content":"ignored"}}]}"#;
        assert_eq!(parse_response(body).unwrap(), "Hello.");
    }

    #[test]
    fn parse_response_without_choices_is_decode_error() {
        assert!(matches!(
            parse_response(r#"{"choices":[]}"#),
            Err(LlmError::Decode { .. })
        ));
        assert!(matches!(
            parse_response("not json"),
            Err(LlmError::Decode { .. })
        ));
    }
}
