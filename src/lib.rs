//! bookgen: generate a book with a language model (outline, then chapters), fetch a cover
//! image, and package the result as EPUB.

pub mod chapter;
pub mod cli;
pub mod config;
pub mod cover;
pub mod epub;
pub mod fallback;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod outline;
pub mod prompt;
pub mod worker;

// Re-exports for CLI and consumers.
pub use chapter::{ChapterError, ChapterSettings, EmptyChapterBehavior};
pub use cover::{fetch_cover, CoverError, ImageSource};
pub use epub::{compile_epub, BookContent, EpubError};
pub use llm::{ApiClient, ApiClientBuilder, HttpBackend, LanguageModel, LlmError, ModelChain, Provider};
pub use model::{BookRequest, CompiledBook, RequestError};
pub use orchestrator::{
    BookError, ChannelObserver, Event, GenerationSettings, Observer, Orchestrator, State,
    TracingObserver,
};
pub use worker::{JobHandle, JobRunner};
