//! Data model for a book request and the artifacts produced while fulfilling it.
//!
//! A [BookRequest] flows through the pipeline unchanged; each stage produces its own
//! value ([Outline], [ChapterFragment], [CoverAsset]) and the last one a [CompiledBook].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One book to generate. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookRequest {
    pub topic: String,
    pub title: String,
    pub author: String,
    #[serde(rename = "chapterCount", alias = "chapters")]
    pub chapter_count: u32,
    #[serde(rename = "outputPath", alias = "output")]
    pub output_path: PathBuf,
    #[serde(rename = "coverPath", alias = "cover")]
    pub cover_path: PathBuf,
}

/// Rejections raised before any external call is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Topic must not be empty.")]
    EmptyTopic,

    #[error("Title must not be empty.")]
    EmptyTitle,

    #[error("Author must not be empty.")]
    EmptyAuthor,

    #[error("Chapter count must be at least 1.")]
    ZeroChapters,

    #[error("Output path must not be empty.")]
    EmptyOutputPath,

    #[error("Cover path must not be empty.")]
    EmptyCoverPath,

    #[error("Output and cover paths must differ: {0}")]
    SamePath(PathBuf),
}

impl BookRequest {
    /// Check the request shape. Does not touch the filesystem.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.topic.trim().is_empty() {
            return Err(RequestError::EmptyTopic);
        }
        if self.title.trim().is_empty() {
            return Err(RequestError::EmptyTitle);
        }
        if self.author.trim().is_empty() {
            return Err(RequestError::EmptyAuthor);
        }
        if self.chapter_count == 0 {
            return Err(RequestError::ZeroChapters);
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(RequestError::EmptyOutputPath);
        }
        if self.cover_path.as_os_str().is_empty() {
            return Err(RequestError::EmptyCoverPath);
        }
        if self.output_path == self.cover_path {
            return Err(RequestError::SamePath(self.output_path.clone()));
        }
        Ok(())
    }
}

/// How an [Outline] was obtained from the model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineSource {
    /// The response held exactly the requested number of titles.
    Parsed,
    /// The response held `found` titles and was truncated or padded.
    Repaired { found: usize },
    /// The response could not be read as a list; every title is synthetic.
    Synthesized { reason: String },
}

/// Ordered chapter titles, always exactly the requested count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline {
    pub titles: Vec<String>,
    pub source: OutlineSource,
}

impl Outline {
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

/// Markup for one chapter, in outline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterFragment {
    /// 1-based position in the outline.
    pub index: u32,
    pub title: String,
    pub body_markup: String,
}

/// Join fragments into the markup passed to the archive compiler.
pub fn concat_fragments(fragments: &[ChapterFragment]) -> String {
    let mut out = String::new();
    for fragment in fragments {
        out.push_str(&fragment.body_markup);
        out.push('\n');
    }
    out
}

/// Cover image bytes as written to disk.
#[derive(Debug, Clone)]
pub struct CoverAsset {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    /// URL of the endpoint that produced the image.
    pub source_url: String,
}

/// File name of `path`, or `cover.png` when it has none.
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "cover.png".to_string())
}

/// The finished EPUB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBook {
    pub path: PathBuf,
    pub chapters: u32,
    pub cover_path: PathBuf,
}
