//! Chapter rendering. One model call per outline title, converted to an XHTML fragment.

use crate::llm::{LanguageModel, LlmError};
use crate::model::{ChapterFragment, Outline};
use crate::prompt::chapter_prompt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default pause between successive chapter calls.
pub const DEFAULT_CHAPTER_DELAY: Duration = Duration::from_secs(1);

const EMPTY_PLACEHOLDER: &str = "This chapter has no content.";

/// How to handle a chapter whose model response is empty or whitespace-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyChapterBehavior {
    /// Insert a single placeholder paragraph (default).
    #[default]
    Placeholder,
    /// Keep the heading with no paragraphs.
    Keep,
    /// Fail the request.
    Fail,
}

/// Parse an empty-chapter behavior name (case-insensitive).
pub fn parse_empty_chapter_behavior(s: &str) -> Result<EmptyChapterBehavior, String> {
    match s.to_lowercase().as_str() {
        "placeholder" => Ok(EmptyChapterBehavior::Placeholder),
        "keep" => Ok(EmptyChapterBehavior::Keep),
        "fail" => Ok(EmptyChapterBehavior::Fail),
        _ => Err(format!(
            "Invalid empty-chapters value: '{}'. Use placeholder, keep, or fail.",
            s
        )),
    }
}

/// Chapter generation failed.
#[derive(Debug, Error)]
pub enum ChapterError {
    #[error("Chapter {index} ({title}) failed: {source}")]
    Model {
        index: u32,
        title: String,
        #[source]
        source: LlmError,
    },

    #[error("Chapter {index} ({title}) came back empty.")]
    EmptyResponse { index: u32, title: String },
}

/// Settings for the chapter loop.
#[derive(Debug, Clone)]
pub struct ChapterSettings {
    pub max_tokens: u32,
    pub delay: Duration,
    pub empty_behavior: EmptyChapterBehavior,
}

impl Default for ChapterSettings {
    fn default() -> Self {
        Self {
            max_tokens: crate::prompt::DEFAULT_CHAPTER_MAX_TOKENS,
            delay: DEFAULT_CHAPTER_DELAY,
            empty_behavior: EmptyChapterBehavior::default(),
        }
    }
}

/// Progress callbacks from [render_all].
pub trait ChapterProgress {
    fn started(&self, index: u32, total: u32, title: &str);
    fn finished(&self, fragment: &ChapterFragment, total: u32);
    fn empty(&self, index: u32, title: &str);
}

/// Generate one chapter and wrap it in markup.
pub fn render_chapter(
    model: &dyn LanguageModel,
    topic: &str,
    title: &str,
    index: u32,
    settings: &ChapterSettings,
    progress: &dyn ChapterProgress,
) -> Result<ChapterFragment, ChapterError> {
    let prompt = chapter_prompt(topic, title, settings.max_tokens);
    let text = model.complete(&prompt).map_err(|e| ChapterError::Model {
        index,
        title: title.to_string(),
        source: e,
    })?;
    let body_markup = if text.trim().is_empty() {
        warn!(chapter = index, title, "model returned an empty chapter");
        progress.empty(index, title);
        match settings.empty_behavior {
            EmptyChapterBehavior::Placeholder => fragment_markup(index, title, EMPTY_PLACEHOLDER),
            EmptyChapterBehavior::Keep => fragment_markup(index, title, ""),
            EmptyChapterBehavior::Fail => {
                return Err(ChapterError::EmptyResponse {
                    index,
                    title: title.to_string(),
                })
            }
        }
    } else {
        fragment_markup(index, title, &text)
    };
    Ok(ChapterFragment {
        index,
        title: title.to_string(),
        body_markup,
    })
}

/// Generate every chapter in outline order, pausing `settings.delay` between calls.
pub fn render_all(
    model: &dyn LanguageModel,
    topic: &str,
    outline: &Outline,
    settings: &ChapterSettings,
    progress: &dyn ChapterProgress,
) -> Result<Vec<ChapterFragment>, ChapterError> {
    let total = outline.len() as u32;
    let mut fragments = Vec::with_capacity(outline.len());
    for (i, title) in outline.titles.iter().enumerate() {
        let index = i as u32 + 1;
        if index > 1 && !settings.delay.is_zero() {
            std::thread::sleep(settings.delay);
        }
        debug!(chapter = index, total, title = %title, "generating chapter");
        progress.started(index, total, title);
        let fragment = render_chapter(model, topic, title, index, settings, progress)?;
        progress.finished(&fragment, total);
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// `<h2>Chapter n: title</h2>` followed by one `<p>` per non-blank line.
pub fn fragment_markup(index: u32, title: &str, text: &str) -> String {
    let mut out = format!("<h2>Chapter {}: {}</h2>", index, xml_escape(title));
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        out.push_str("\n<p>");
        out.push_str(&xml_escape(line));
        out.push_str("</p>");
    }
    out
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
