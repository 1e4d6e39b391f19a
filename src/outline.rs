//! Outline parsing. Turns a model response into exactly N chapter titles.
//!
//! Models do not reliably honor "return only the JSON array": the response may be wrapped
//! in a fenced block or in a sentence of chatter, and may carry too many or too few items.
//! [parse_outline] absorbs those deviations; [outline_or_fallback] never fails.

use crate::model::{Outline, OutlineSource};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// The response could not be read as a list of titles. Recoverable: callers substitute
/// synthetic titles.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutlineError {
    #[error("Outline response is not valid JSON: {reason}")]
    NotJson { reason: String },

    #[error("Outline response is JSON but not an array (found {found}).")]
    NotAList { found: &'static str },
}

/// Synthetic title for 1-based position `k`.
pub fn synthetic_title(k: usize) -> String {
    format!("Chapter {}", k)
}

/// Parse and repair: returns exactly `chapter_count` titles, or an error if the response
/// holds no recognizable list.
pub fn parse_outline(raw: &str, chapter_count: usize) -> Result<Outline, OutlineError> {
    let items = extract_list(raw)?;
    let found = items.len();
    let titles = repair(items, chapter_count);
    let source = if found == chapter_count {
        OutlineSource::Parsed
    } else {
        OutlineSource::Repaired { found }
    };
    Ok(Outline { titles, source })
}

/// Like [parse_outline], but substitutes `Chapter 1..=N` when the response is unusable.
pub fn outline_or_fallback(raw: &str, chapter_count: usize) -> Outline {
    match parse_outline(raw, chapter_count) {
        Ok(outline) => {
            if let OutlineSource::Repaired { found } = outline.source {
                warn!(expected = chapter_count, found, "outline length adjusted");
            }
            outline
        }
        Err(e) => {
            warn!(error = %e, "outline unusable; using placeholder titles");
            Outline {
                titles: (1..=chapter_count).map(synthetic_title).collect(),
                source: OutlineSource::Synthesized {
                    reason: e.to_string(),
                },
            }
        }
    }
}

/// Truncate to the first `n` entries or pad with synthetic titles. Blank entries are
/// replaced by the synthetic title for their position.
fn repair(items: Vec<String>, n: usize) -> Vec<String> {
    let mut titles: Vec<String> = items
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, t)| {
            if t.is_empty() {
                synthetic_title(i + 1)
            } else {
                t
            }
        })
        .collect();
    while titles.len() < n {
        titles.push(synthetic_title(titles.len() + 1));
    }
    titles
}

fn extract_list(raw: &str) -> Result<Vec<String>, OutlineError> {
    let body = fenced_block(raw).unwrap_or(raw).trim();
    let value = match serde_json::from_str::<Value>(body) {
        Ok(v) => v,
        Err(e) => bracketed_span(body)
            .and_then(|span| serde_json::from_str::<Value>(span).ok())
            .ok_or_else(|| OutlineError::NotJson {
                reason: e.to_string(),
            })?,
    };
    match value {
        Value::Array(entries) => Ok(entries.into_iter().map(entry_text).collect()),
        other => Err(OutlineError::NotAList {
            found: json_kind(&other),
        }),
    }
}

/// Content of the first ``` fenced block, without the language tag line.
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")? + 3;
    let rest = &raw[start..];
    let end = rest.find("```").unwrap_or(rest.len());
    let block = &rest[..end];
    // Opening line may carry a language tag such as `json`.
    match block.split_once('\n') {
        Some((tag, content)) if is_language_tag(tag) => Some(content),
        _ => Some(block),
    }
}

fn is_language_tag(s: &str) -> bool {
    let s = s.trim();
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn bracketed_span(s: &str) -> Option<&str> {
    let open = s.find('[')?;
    let close = s.rfind(']')?;
    if close > open {
        Some(&s[open..=close])
    } else {
        None
    }
}

/// Objects contribute their string `title` field; arrays and objects without one are blank.
fn entry_text(v: Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => map
            .get("title")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        Value::Null | Value::Array(_) => String::new(),
        other => other.to_string(),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
