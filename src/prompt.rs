//! Prompt construction for the outline and chapter requests.

/// System instruction sent with every request (providers that have no system slot ignore it).
pub const SYSTEM_INSTRUCTION: &str = "You are an expert writer creating book content.";

pub const DEFAULT_OUTLINE_MAX_TOKENS: u32 = 500;
pub const DEFAULT_CHAPTER_MAX_TOKENS: u32 = 2000;

/// One conversation turn plus generation limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
}

impl Prompt {
    pub fn new(user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: Some(SYSTEM_INSTRUCTION.to_string()),
            user: user.into(),
            max_tokens,
        }
    }
}

/// Ask for a JSON array of exactly `chapter_count` chapter titles.
pub fn outline_prompt(topic: &str, chapter_count: u32, max_tokens: u32) -> Prompt {
    Prompt::new(
        format!(
            "Generate a JSON array with exactly {chapter_count} strings. \
             Each string should be a concise chapter title for a book on the topic: '{topic}'. \
             Do not include any extra text, numbering, or sub-chapter points. \
             Return only the JSON array."
        ),
        max_tokens,
    )
}

/// Ask for one chapter of flowing narrative prose.
pub fn chapter_prompt(topic: &str, chapter_title: &str, max_tokens: u32) -> Prompt {
    Prompt::new(
        format!(
            "Write a detailed and narrative chapter on '{topic}'. \
             The chapter title is '{chapter_title}'. \
             Please provide a thorough discussion with full paragraphs, \
             rich explanations, and smooth transitions between ideas. \
             Avoid using bullet points, lists, or fragmented points; \
             focus on creating a flowing narrative that fully explores the topic."
        ),
        max_tokens,
    )
}
