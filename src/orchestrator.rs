//! Request orchestration: outline, chapters, cover, archive, in that order.
//!
//! Progress is reported to an [Observer] passed in per request. Any component failure moves
//! the run to [State::Failed] and stops it; files already written are left in place.

use crate::chapter::{render_all, ChapterError, ChapterProgress, ChapterSettings};
use crate::cover::{fetch_cover, CoverError, FetchAttempt, ImageSource};
use crate::epub::{compile_epub, BookContent, EpubError};
use crate::llm::{LanguageModel, LlmError};
use crate::model::{
    concat_fragments, BookRequest, ChapterFragment, CompiledBook, Outline, OutlineSource,
    RequestError,
};
use crate::outline::outline_or_fallback;
use crate::prompt::{outline_prompt, DEFAULT_OUTLINE_MAX_TOKENS};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, error, info};

/// Pipeline state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    GeneratingOutline,
    GeneratingChapters,
    FetchingCover,
    Compiling,
    Done,
    Failed,
}

impl State {
    pub fn label(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::GeneratingOutline => "generating outline",
            State::GeneratingChapters => "generating chapters",
            State::FetchingCover => "fetching cover",
            State::Compiling => "compiling EPUB",
            State::Done => "done",
            State::Failed => "failed",
        }
    }
}

/// Something that happened while fulfilling a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChanged(State),
    OutlineReady {
        titles: Vec<String>,
    },
    OutlineRepaired {
        expected: usize,
        found: usize,
    },
    OutlineSynthesized {
        reason: String,
    },
    ChapterStarted {
        index: u32,
        total: u32,
        title: String,
    },
    ChapterFinished {
        index: u32,
        total: u32,
    },
    ChapterEmpty {
        index: u32,
        title: String,
    },
    CoverEndpointFailed {
        url: String,
        reason: String,
    },
    CoverSaved {
        path: PathBuf,
        url: String,
    },
    Done {
        path: PathBuf,
    },
    Failed {
        message: String,
    },
}

/// Receives events for one request. Must be safe to call from a worker thread.
pub trait Observer: Send + Sync {
    fn report(&self, event: &Event);
}

/// Writes progress events as structured log lines. Problems (repairs, fallbacks, failures)
/// are already logged where they happen and are not repeated here.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn report(&self, event: &Event) {
        match event {
            Event::StateChanged(state) => info!(state = state.label(), "state changed"),
            Event::OutlineReady { titles } => info!(chapters = titles.len(), "outline ready"),
            Event::ChapterStarted {
                index,
                total,
                title,
            } => info!(chapter = index, total, title = %title, "chapter started"),
            Event::ChapterFinished { index, total } => {
                info!(chapter = index, total, "chapter finished")
            }
            Event::CoverSaved { path, url } => {
                info!(path = %path.display(), url = %url, "cover saved")
            }
            Event::Done { path } => info!(path = %path.display(), "book complete"),
            Event::OutlineRepaired { .. }
            | Event::OutlineSynthesized { .. }
            | Event::ChapterEmpty { .. }
            | Event::CoverEndpointFailed { .. }
            | Event::Failed { .. } => {}
        }
    }
}

/// Forwards events to another thread. Send failures (receiver gone) are ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<Event>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<Event>) -> Self {
        Self { tx }
    }
}

impl Observer for ChannelObserver {
    fn report(&self, event: &Event) {
        let _ = self.tx.send(event.clone());
    }
}

/// Reports to several observers in order.
pub struct Fanout(pub Vec<Box<dyn Observer>>);

impl Observer for Fanout {
    fn report(&self, event: &Event) {
        for o in &self.0 {
            o.report(event);
        }
    }
}

/// Request failed. Carries the state in which it failed.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("Invalid request: {0}")]
    Invalid(#[from] RequestError),

    #[error("Outline generation failed: {0}")]
    Outline(#[source] LlmError),

    #[error("{0}")]
    Chapter(#[from] ChapterError),

    #[error("{0}")]
    Cover(#[from] CoverError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("Another job is already writing {0}")]
    OutputBusy(PathBuf),

    #[error("Worker thread failed: {0}")]
    Worker(String),
}

impl BookError {
    /// State the pipeline was in when this error occurred.
    pub fn failed_in(&self) -> State {
        match self {
            BookError::Invalid(_) | BookError::OutputBusy(_) | BookError::Worker(_) => {
                State::Idle
            }
            BookError::Outline(_) => State::GeneratingOutline,
            BookError::Chapter(_) => State::GeneratingChapters,
            BookError::Cover(_) => State::FetchingCover,
            BookError::Epub(_) => State::Compiling,
        }
    }
}

/// Per-request generation settings. Fixed for the lifetime of a request.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub outline_max_tokens: u32,
    pub chapters: ChapterSettings,
    pub cover_endpoints: Vec<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            outline_max_tokens: DEFAULT_OUTLINE_MAX_TOKENS,
            chapters: ChapterSettings::default(),
            cover_endpoints: crate::cover::default_endpoints(),
        }
    }
}

/// Runs requests. Holds no per-request state, so one instance can serve parallel jobs.
pub struct Orchestrator {
    model: Box<dyn LanguageModel>,
    images: Box<dyn ImageSource>,
    settings: GenerationSettings,
}

struct Run<'a> {
    observer: &'a dyn Observer,
    state: State,
}

impl Run<'_> {
    fn enter(&mut self, state: State) {
        self.state = state;
        self.observer.report(&Event::StateChanged(state));
    }
}

impl ChapterProgress for Run<'_> {
    fn started(&self, index: u32, total: u32, title: &str) {
        self.observer.report(&Event::ChapterStarted {
            index,
            total,
            title: title.to_string(),
        });
    }

    fn finished(&self, fragment: &ChapterFragment, total: u32) {
        self.observer.report(&Event::ChapterFinished {
            index: fragment.index,
            total,
        });
    }

    fn empty(&self, index: u32, title: &str) {
        self.observer.report(&Event::ChapterEmpty {
            index,
            title: title.to_string(),
        });
    }
}

impl Orchestrator {
    pub fn new(
        model: Box<dyn LanguageModel>,
        images: Box<dyn ImageSource>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            model,
            images,
            settings,
        }
    }

    /// Run one request to `Done` or `Failed`.
    pub fn run(
        &self,
        request: &BookRequest,
        observer: &dyn Observer,
    ) -> Result<CompiledBook, BookError> {
        let mut run = Run {
            observer,
            state: State::Idle,
        };
        match self.run_steps(request, &mut run) {
            Ok(book) => {
                run.enter(State::Done);
                observer.report(&Event::Done {
                    path: book.path.clone(),
                });
                Ok(book)
            }
            Err(e) => {
                error!(state = run.state.label(), error = %e, "request failed");
                run.enter(State::Failed);
                observer.report(&Event::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn run_steps(&self, request: &BookRequest, run: &mut Run<'_>) -> Result<CompiledBook, BookError> {
        request.validate()?;

        run.enter(State::GeneratingOutline);
        let outline = self.generate_outline(request, &*run)?;

        run.enter(State::GeneratingChapters);
        let fragments = render_all(
            self.model.as_ref(),
            &request.topic,
            &outline,
            &self.settings.chapters,
            &*run,
        )?;

        run.enter(State::FetchingCover);
        let observer = run.observer;
        let on_failure = |attempt: &FetchAttempt| {
            observer.report(&Event::CoverEndpointFailed {
                url: attempt.url.clone(),
                reason: attempt.failure.to_string(),
            })
        };
        let cover = fetch_cover(
            self.images.as_ref(),
            &self.settings.cover_endpoints,
            &request.topic,
            &request.cover_path,
            &on_failure,
        )?;
        observer.report(&Event::CoverSaved {
            path: cover.path.clone(),
            url: cover.source_url.clone(),
        });

        run.enter(State::Compiling);
        let markup = concat_fragments(&fragments);
        let content = BookContent {
            title: &request.title,
            author: &request.author,
            markup: &markup,
        };
        let path = compile_epub(&content, &cover.path, &request.output_path)?;

        Ok(CompiledBook {
            path,
            chapters: fragments.len() as u32,
            cover_path: cover.path,
        })
    }

    fn generate_outline(&self, request: &BookRequest, run: &Run<'_>) -> Result<Outline, BookError> {
        debug!(topic = %request.topic, chapters = request.chapter_count, "requesting outline");
        let prompt = outline_prompt(
            &request.topic,
            request.chapter_count,
            self.settings.outline_max_tokens,
        );
        let raw = self.model.complete(&prompt).map_err(BookError::Outline)?;
        let expected = request.chapter_count as usize;
        let outline = outline_or_fallback(&raw, expected);
        match &outline.source {
            OutlineSource::Parsed => {}
            OutlineSource::Repaired { found } => run.observer.report(&Event::OutlineRepaired {
                expected,
                found: *found,
            }),
            OutlineSource::Synthesized { reason } => {
                run.observer.report(&Event::OutlineSynthesized {
                    reason: reason.clone(),
                })
            }
        }
        run.observer.report(&Event::OutlineReady {
            titles: outline.titles.clone(),
        });
        Ok(outline)
    }
}
