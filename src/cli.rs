//! CLI parsing and job orchestration. Builds requests from flags or a batch file, runs each as a
//! background job with a progress bar, and maps errors to exit codes.

use crate::chapter::{
    parse_empty_chapter_behavior, ChapterSettings, EmptyChapterBehavior, DEFAULT_CHAPTER_DELAY,
};
use crate::config::{self, Config};
use crate::cover::{default_endpoints, CoverError, DEFAULT_COVER_TIMEOUT_SECS};
use crate::epub::{run_epubcheck, slugify};
use crate::llm::{
    parse_provider, ApiClient, HttpBackend, LlmError, ModelChain, Provider, DEFAULT_TEMPERATURE,
};
use crate::model::{BookRequest, CompiledBook};
use crate::orchestrator::{
    BookError, ChannelObserver, Event, Fanout, GenerationSettings, Observer, Orchestrator,
    TracingObserver,
};
use crate::prompt::{DEFAULT_CHAPTER_MAX_TOKENS, DEFAULT_OUTLINE_MAX_TOKENS};
use crate::worker::{JobHandle, JobRunner};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_AUTHOR: &str = "Unknown Author";
const EPUB_EXTENSION: &str = "epub";
const DEFAULT_CHAPTERS: u32 = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Book(#[from] BookError),

    #[error("{0}")]
    Validation(String),

    #[error("{failed} of {total} books failed.")]
    Batch {
        failed: usize,
        total: usize,
        code: i32,
    },
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Book(e) => book_exit_code(e),
            CliRunError::Validation(_) => 3,
            CliRunError::Batch { code, .. } => *code,
        }
    }
}

/// 1 for input/config problems, 2 for model or cover transport, 3 for output.
fn book_exit_code(e: &BookError) -> i32 {
    match e {
        BookError::Invalid(_) | BookError::OutputBusy(_) => 1,
        BookError::Outline(LlmError::MissingApiKey { .. }) => 1,
        BookError::Outline(_) | BookError::Chapter(_) => 2,
        BookError::Cover(CoverError::NoEndpoints) => 1,
        BookError::Cover(CoverError::Exhausted { .. }) => 2,
        BookError::Cover(CoverError::Write { .. }) | BookError::Epub(_) | BookError::Worker(_) => 3,
    }
}

#[derive(Parser, Debug)]
#[command(name = "bookgen")]
#[command(about = "Generate a book with a language model and write it as EPUB")]
#[command(
    after_help = "Config file keys (output_dir, provider, model, fallback_models, api_base_url, user_agent, timeout_secs, cover_timeout_secs, chapter_delay_secs, outline_max_tokens, chapter_max_tokens, temperature, cover_endpoints, empty_chapters) are read from ./bookgen.toml or the user config directory. CLI flags override config. API keys come from OPENAI_API_KEY or ANTHROPIC_API_KEY; a .env file is honored."
)]
pub struct Args {
    /// Subject of the book.
    #[arg(long, required_unless_present = "batch", conflicts_with = "batch")]
    pub topic: Option<String>,

    /// Book title. Default: "Book about <topic>".
    #[arg(long)]
    pub title: Option<String>,

    /// Author name. Default: Unknown Author.
    #[arg(long)]
    pub author: Option<String>,

    /// Number of chapters.
    #[arg(long, default_value_t = DEFAULT_CHAPTERS)]
    pub chapters: u32,

    /// EPUB output path; `.epub` is appended when missing. Relative paths are resolved against
    /// output_dir when configured.
    #[arg(short, long, default_value = "book.epub")]
    pub output: PathBuf,

    /// Where the downloaded cover image is saved.
    #[arg(long, default_value = "cover.png")]
    pub cover: PathBuf,

    /// Language-model vendor: openai (default) or anthropic.
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<Provider>,

    /// Model identifier tried first (overrides config).
    #[arg(long)]
    pub model: Option<String>,

    /// How to handle empty chapter responses: placeholder (default), keep, or fail.
    #[arg(long, value_parser = parse_empty_chapter_behavior)]
    pub empty_chapters: Option<EmptyChapterBehavior>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Pause between chapter requests in seconds (overrides config; default 1).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 120).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// JSON file with an array of requests, run as parallel jobs.
    #[arg(long)]
    pub batch: Option<PathBuf>,

    /// After writing an EPUB, run epubcheck to validate it (epubcheck must be on PATH).
    #[arg(long)]
    pub validate: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Log progress lines instead of a progress bar, and print the error chain.
    #[arg(long)]
    pub verbose: bool,
}

/// One entry of a batch file. Only `topic` is required.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    topic: String,
    title: Option<String>,
    author: Option<String>,
    #[serde(rename = "chapterCount", alias = "chapters")]
    chapter_count: Option<u32>,
    #[serde(rename = "outputPath", alias = "output")]
    output_path: Option<PathBuf>,
    #[serde(rename = "coverPath", alias = "cover")]
    cover_path: Option<PathBuf>,
}

impl BatchEntry {
    fn into_request(self, default_chapters: u32) -> BookRequest {
        let title = non_blank(self.title).unwrap_or_else(|| default_title(&self.topic));
        let slug = slugify(&title);
        BookRequest {
            author: non_blank(self.author).unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            chapter_count: self.chapter_count.unwrap_or(default_chapters),
            output_path: with_epub_extension(
                self.output_path
                    .unwrap_or_else(|| PathBuf::from(format!("{}.{}", slug, EPUB_EXTENSION))),
            ),
            cover_path: self
                .cover_path
                .unwrap_or_else(|| PathBuf::from(format!("{}-cover.png", slug))),
            topic: self.topic,
            title,
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

fn default_title(topic: &str) -> String {
    format!("Book about {}", topic.trim())
}

/// Append `.epub` unless the path already ends with it (any case).
fn with_epub_extension(path: PathBuf) -> PathBuf {
    let has_extension = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(EPUB_EXTENSION));
    if has_extension {
        return path;
    }
    let mut name = path.into_os_string();
    name.push(".");
    name.push(EPUB_EXTENSION);
    PathBuf::from(name)
}

fn single_request(args: &Args) -> Result<BookRequest, CliRunError> {
    let topic = non_blank(args.topic.clone())
        .ok_or_else(|| CliRunError::InvalidInput("A topic is required. Use --topic.".to_string()))?;
    Ok(BookRequest {
        title: non_blank(args.title.clone()).unwrap_or_else(|| default_title(&topic)),
        author: non_blank(args.author.clone()).unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
        chapter_count: args.chapters,
        output_path: with_epub_extension(args.output.clone()),
        cover_path: args.cover.clone(),
        topic,
    })
}

fn load_batch(path: &Path, default_chapters: u32) -> Result<Vec<BookRequest>, CliRunError> {
    let f = std::fs::File::open(path).map_err(|e| {
        CliRunError::InvalidInput(format!("Cannot read batch file {}: {}", path.display(), e))
    })?;
    let entries: Vec<BatchEntry> = serde_json::from_reader(f).map_err(|e| {
        CliRunError::InvalidInput(format!("Invalid batch file {}: {}", path.display(), e))
    })?;
    if entries.is_empty() {
        return Err(CliRunError::InvalidInput(format!(
            "Batch file {} holds no requests.",
            path.display()
        )));
    }
    Ok(entries
        .into_iter()
        .map(|e| e.into_request(default_chapters))
        .collect())
}

/// Join relative paths onto `dir`.
fn resolve_path(dir: Option<&Path>, path: PathBuf) -> PathBuf {
    match dir {
        Some(d) if path.is_relative() => d.join(path),
        _ => path,
    }
}

/// Ensure the parent directory of an output file exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Check requests up front so nothing is generated when any of them is unusable.
fn prepare_requests(
    requests: Vec<BookRequest>,
    output_dir: Option<&Path>,
) -> Result<Vec<BookRequest>, CliRunError> {
    let mut seen: Vec<PathBuf> = Vec::with_capacity(requests.len());
    let mut prepared = Vec::with_capacity(requests.len());
    for mut request in requests {
        request.output_path = resolve_path(output_dir, request.output_path);
        request.cover_path = resolve_path(output_dir, request.cover_path);
        request.validate().map_err(|e| {
            CliRunError::InvalidInput(format!("Invalid request '{}': {}", request.topic, e))
        })?;
        validate_output_path(&request.output_path)?;
        validate_output_path(&request.cover_path)?;
        if seen.contains(&request.output_path) || seen.contains(&request.cover_path) {
            return Err(CliRunError::InvalidInput(format!(
                "Two requests write the same file: {}",
                request.output_path.display()
            )));
        }
        seen.push(request.output_path.clone());
        seen.push(request.cover_path.clone());
        prepared.push(request);
    }
    Ok(prepared)
}

fn generation_settings(
    args: &Args,
    config: Option<&Config>,
) -> Result<GenerationSettings, CliRunError> {
    let empty_behavior = match args.empty_chapters {
        Some(b) => b,
        None => config
            .and_then(|c| c.empty_chapters.as_deref())
            .map(parse_empty_chapter_behavior)
            .transpose()
            .map_err(CliRunError::InvalidInput)?
            .unwrap_or_default(),
    };
    let delay = args
        .delay
        .or_else(|| config.and_then(|c| c.chapter_delay_secs))
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CHAPTER_DELAY);
    Ok(GenerationSettings {
        outline_max_tokens: config
            .and_then(|c| c.outline_max_tokens)
            .unwrap_or(DEFAULT_OUTLINE_MAX_TOKENS),
        chapters: ChapterSettings {
            max_tokens: config
                .and_then(|c| c.chapter_max_tokens)
                .unwrap_or(DEFAULT_CHAPTER_MAX_TOKENS),
            delay,
            empty_behavior,
        },
        cover_endpoints: config
            .and_then(|c| c.cover_endpoints.clone())
            .unwrap_or_else(default_endpoints),
    })
}

fn select_provider(args: &Args, config: Option<&Config>) -> Result<Provider, CliRunError> {
    if let Some(p) = args.provider {
        return Ok(p);
    }
    match config.and_then(|c| c.provider.as_deref()) {
        Some(name) => parse_provider(name).map_err(CliRunError::InvalidInput),
        None => Ok(Provider::OpenAi),
    }
}

fn build_orchestrator(args: &Args, config: Option<&Config>) -> Result<Orchestrator, CliRunError> {
    const DEFAULT_TIMEOUT_SECS: u64 = 120;
    let settings = generation_settings(args, config)?;
    let provider = select_provider(args, config)?;

    let timeout_secs = args
        .timeout
        .or_else(|| config.and_then(|c| c.timeout_secs))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.and_then(|c| c.user_agent.clone()));
    let client = http_client(timeout_secs, user_agent.clone())?;
    let cover_client = http_client(cover_timeout_secs(config), user_agent)?;

    let mut backend = HttpBackend::from_env(provider, client)
        .map_err(|e| CliRunError::InvalidInput(e.to_string()))?
        .temperature(
            config
                .and_then(|c| c.temperature)
                .unwrap_or(DEFAULT_TEMPERATURE),
        );
    if let Some(url) = config.and_then(|c| c.api_base_url.clone()) {
        backend = backend.base_url(url);
    }

    let model = args
        .model
        .clone()
        .or_else(|| config.and_then(|c| c.model.clone()))
        .unwrap_or_else(|| provider.default_model().to_string());
    let fallbacks = config
        .and_then(|c| c.fallback_models.clone())
        .unwrap_or_else(|| provider.default_fallback_models());
    let chain = ModelChain::new(Box::new(backend), &model, &fallbacks);
    info!(provider = provider.name(), models = ?chain.models(), "model chain ready");

    Ok(Orchestrator::new(Box::new(chain), Box::new(cover_client), settings))
}

fn http_client(timeout_secs: u64, user_agent: Option<String>) -> Result<ApiClient, CliRunError> {
    let mut builder = ApiClient::builder().timeout_secs(timeout_secs);
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

/// Cover downloads get their own, shorter timeout than model calls.
fn cover_timeout_secs(config: Option<&Config>) -> u64 {
    config
        .and_then(|c| c.cover_timeout_secs)
        .unwrap_or(DEFAULT_COVER_TIMEOUT_SECS)
}

/// How job progress is shown.
#[derive(Debug, Clone, Copy)]
struct ProgressMode {
    bars: bool,
    log_events: bool,
}

impl ProgressMode {
    fn from_args(args: &Args) -> Self {
        Self {
            bars: !args.quiet && !args.verbose,
            log_events: args.verbose && !args.quiet,
        }
    }
}

struct Job {
    output_path: PathBuf,
    bar: ProgressBar,
    started: Result<(JobHandle, Receiver<Event>), BookError>,
}

fn new_bar(multi: &MultiProgress, request: &BookRequest) -> ProgressBar {
    let bar = multi.add(ProgressBar::new(request.chapter_count as u64));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner} {prefix} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.set_prefix(request.title.clone());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Apply one event to a job's progress bar.
fn show(bar: &ProgressBar, event: &Event) {
    match event {
        Event::StateChanged(state) => bar.set_message(state.label()),
        Event::OutlineReady { titles } => bar.set_length(titles.len() as u64),
        Event::OutlineRepaired { expected, found } => bar.println(format!(
            "Warning: outline had {} titles, expected {}; adjusted.",
            found, expected
        )),
        Event::OutlineSynthesized { reason } => bar.println(format!(
            "Warning: outline unusable ({}); using placeholder titles.",
            reason
        )),
        Event::ChapterStarted {
            index,
            total,
            title,
        } => bar.set_message(format!("chapter {}/{}: {}", index, total, title)),
        Event::ChapterFinished { index, .. } => bar.set_position(*index as u64),
        Event::ChapterEmpty { index, title } => bar.println(format!(
            "Warning: chapter {} ({}) came back empty.",
            index, title
        )),
        Event::CoverEndpointFailed { url, reason } => {
            bar.println(format!("Warning: cover endpoint {} failed: {}", url, reason))
        }
        Event::CoverSaved { .. } => {}
        Event::Done { .. } => bar.finish_and_clear(),
        Event::Failed { message } => bar.abandon_with_message(message.clone()),
    }
}

/// Submit every request, drain events into progress bars until all jobs end, then join.
fn run_jobs(
    runner: &JobRunner,
    requests: Vec<BookRequest>,
    mode: ProgressMode,
) -> Vec<(PathBuf, Result<CompiledBook, BookError>)> {
    let multi = if mode.bars {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };
    let jobs: Vec<Job> = requests
        .into_iter()
        .map(|request| {
            let bar = new_bar(&multi, &request);
            let output_path = request.output_path.clone();
            let (tx, rx) = mpsc::channel();
            let observer: Box<dyn Observer> = if mode.log_events {
                Box::new(Fanout(vec![
                    Box::new(TracingObserver),
                    Box::new(ChannelObserver::new(tx)),
                ]))
            } else {
                Box::new(ChannelObserver::new(tx))
            };
            let started = runner.submit(request, observer).map(|h| (h, rx));
            Job {
                output_path,
                bar,
                started,
            }
        })
        .collect();

    loop {
        let mut open = false;
        for job in &jobs {
            let Ok((_, rx)) = &job.started else {
                continue;
            };
            loop {
                match rx.try_recv() {
                    Ok(event) => show(&job.bar, &event),
                    Err(TryRecvError::Empty) => {
                        open = true;
                        break;
                    }
                    Err(TryRecvError::Disconnected) => break,
                }
            }
        }
        if !open {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    jobs.into_iter()
        .map(|job| {
            let result = match job.started {
                Ok((handle, _)) => handle.join(),
                Err(e) => Err(e),
            };
            if result.is_err() && !job.bar.is_finished() {
                job.bar.abandon();
            }
            (job.output_path, result)
        })
        .collect()
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let output_dir = config.as_ref().and_then(|c| c.output_dir.clone());

    let requests = match &args.batch {
        Some(path) => load_batch(path, args.chapters)?,
        None => vec![single_request(args)?],
    };
    let batch = args.batch.is_some();
    let requests = prepare_requests(requests, output_dir.as_deref())?;
    let total = requests.len();

    let orchestrator = build_orchestrator(args, config.as_ref())?;
    let runner = JobRunner::new(orchestrator);
    let results = run_jobs(&runner, requests, ProgressMode::from_args(args));

    let epubcheck = |path: &Path| run_epubcheck(path);
    let validator: Option<&dyn Fn(&Path) -> Result<(), String>> = if args.validate {
        Some(&epubcheck)
    } else {
        None
    };
    summarize(results, batch, total, args.quiet, validator)
}

/// Why one job did not produce a valid book.
#[derive(Debug)]
enum JobFailure {
    Book(BookError),
    Validation(String),
}

impl JobFailure {
    fn exit_code(&self) -> i32 {
        match self {
            JobFailure::Book(e) => book_exit_code(e),
            JobFailure::Validation(_) => 3,
        }
    }

    fn into_error(self) -> CliRunError {
        match self {
            JobFailure::Book(e) => CliRunError::Book(e),
            JobFailure::Validation(msg) => CliRunError::Validation(msg),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::Book(e) => write!(f, "{}", e),
            JobFailure::Validation(msg) => write!(f, "{}", msg),
        }
    }
}

/// Validate and report every finished job, then turn the failures into one error.
fn summarize(
    results: Vec<(PathBuf, Result<CompiledBook, BookError>)>,
    batch: bool,
    total: usize,
    quiet: bool,
    validator: Option<&dyn Fn(&Path) -> Result<(), String>>,
) -> Result<(), CliRunError> {
    let mut failures: Vec<(PathBuf, JobFailure)> = Vec::new();
    for (path, result) in results {
        let book = match result {
            Ok(book) => book,
            Err(e) => {
                failures.push((path, JobFailure::Book(e)));
                continue;
            }
        };
        if let Some(Err(msg)) = validator.map(|check| check(&book.path)) {
            failures.push((path, JobFailure::Validation(msg)));
            continue;
        }
        if !quiet {
            eprintln!(
                "Wrote {} ({} chapters, cover {})",
                book.path.display(),
                book.chapters,
                book.cover_path.display()
            );
        }
    }

    if !batch {
        return match failures.pop() {
            Some((_, e)) => Err(e.into_error()),
            None => Ok(()),
        };
    }
    if failures.is_empty() {
        return Ok(());
    }
    let code = failures
        .iter()
        .map(|(_, e)| e.exit_code())
        .max()
        .unwrap_or(1);
    for (path, e) in &failures {
        eprintln!("Failed {}: {}", path.display(), e);
    }
    Err(CliRunError::Batch {
        failed: failures.len(),
        total,
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::EpubError;
    use crate::model::RequestError;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("bookgen").chain(argv.iter().copied()))
    }

    #[test]
    fn defaults_follow_form_values() {
        let args = parse(&["--topic", "Roman Aqueducts"]).unwrap();
        assert_eq!(args.chapters, 5);
        assert_eq!(args.output, PathBuf::from("book.epub"));
        assert_eq!(args.cover, PathBuf::from("cover.png"));
        let r = single_request(&args).unwrap();
        assert_eq!(r.title, "Book about Roman Aqueducts");
        assert_eq!(r.output_path, PathBuf::from("book.epub"));
        assert_eq!(r.author, "Unknown Author");
        assert_eq!(r.chapter_count, 5);
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let args = parse(&[
            "--topic",
            "Tides",
            "--title",
            "The Moon's Pull",
            "--author",
            "B. Writer",
            "--chapters",
            "3",
            "-o",
            "tides.epub",
            "--provider",
            "anthropic",
            "--empty-chapters",
            "fail",
        ])
        .unwrap();
        let r = single_request(&args).unwrap();
        assert_eq!(r.title, "The Moon's Pull");
        assert_eq!(r.author, "B. Writer");
        assert_eq!(r.chapter_count, 3);
        assert_eq!(r.output_path, PathBuf::from("tides.epub"));
        assert_eq!(args.provider, Some(Provider::Anthropic));
        assert_eq!(args.empty_chapters, Some(EmptyChapterBehavior::Fail));
    }

    #[test]
    fn blank_title_falls_back_to_book_about_topic() {
        let args = parse(&["--topic", "Tides", "--title", "  "]).unwrap();
        assert_eq!(single_request(&args).unwrap().title, "Book about Tides");
    }

    #[test]
    fn output_without_epub_extension_gets_one() {
        let args = parse(&["--topic", "Tides", "-o", "mybook"]).unwrap();
        assert_eq!(
            single_request(&args).unwrap().output_path,
            PathBuf::from("mybook.epub")
        );
        let args = parse(&["--topic", "Tides", "-o", "notes.txt"]).unwrap();
        assert_eq!(
            single_request(&args).unwrap().output_path,
            PathBuf::from("notes.txt.epub")
        );
        let args = parse(&["--topic", "Tides", "-o", "Upper.EPUB"]).unwrap();
        assert_eq!(
            single_request(&args).unwrap().output_path,
            PathBuf::from("Upper.EPUB")
        );
    }

    #[test]
    fn topic_or_batch_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--batch", "b.json"]).is_ok());
        assert!(parse(&["--topic", "x", "--batch", "b.json"]).is_err());
    }

    #[test]
    fn invalid_provider_rejected_by_parser() {
        assert!(parse(&["--topic", "x", "--provider", "other"]).is_err());
    }

    #[test]
    fn batch_entries_fill_defaults() {
        let json = r#"[
            {"topic": "Roman Aqueducts"},
            {"topic": "Tides", "title": "Moon Pull", "author": "B", "chapters": 2,
             "output": "t.epub", "cover": "t.png"},
            {"topic": "Dunes", "output": "out/dunes"}
        ]"#;
        let path = std::env::temp_dir().join(format!("bookgen_batch_{}.json", std::process::id()));
        std::fs::write(&path, json).unwrap();
        let requests = load_batch(&path, 4).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].title, "Book about Roman Aqueducts");
        assert_eq!(requests[0].author, "Unknown Author");
        assert_eq!(requests[0].chapter_count, 4);
        assert_eq!(
            requests[0].output_path,
            PathBuf::from("book-about-roman-aqueducts.epub")
        );
        assert_eq!(
            requests[0].cover_path,
            PathBuf::from("book-about-roman-aqueducts-cover.png")
        );
        assert_eq!(requests[1].chapter_count, 2);
        assert_eq!(requests[1].output_path, PathBuf::from("t.epub"));
        assert_eq!(requests[2].output_path, PathBuf::from("out/dunes.epub"));
    }

    #[test]
    fn empty_or_malformed_batch_is_invalid_input() {
        let path = std::env::temp_dir().join(format!("bookgen_batch_bad_{}.json", std::process::id()));
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            load_batch(&path, 5),
            Err(CliRunError::InvalidInput(_))
        ));
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_batch(&path, 5),
            Err(CliRunError::InvalidInput(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn relative_paths_resolve_against_output_dir() {
        let dir = Path::new("books");
        assert_eq!(
            resolve_path(Some(dir), PathBuf::from("a.epub")),
            PathBuf::from("books/a.epub")
        );
        assert_eq!(
            resolve_path(Some(dir), PathBuf::from("/tmp/a.epub")),
            PathBuf::from("/tmp/a.epub")
        );
        assert_eq!(
            resolve_path(None, PathBuf::from("a.epub")),
            PathBuf::from("a.epub")
        );
    }

    #[test]
    fn prepare_rejects_duplicate_outputs_and_bad_requests() {
        let dir = std::env::temp_dir();
        let request = BookRequest {
            topic: "T".to_string(),
            title: "T".to_string(),
            author: "A".to_string(),
            chapter_count: 1,
            output_path: dir.join("bookgen_dup.epub"),
            cover_path: dir.join("bookgen_dup.png"),
        };
        let err = prepare_requests(vec![request.clone(), request.clone()], None).unwrap_err();
        assert!(matches!(err, CliRunError::InvalidInput(ref m) if m.contains("same file")));

        let mut zero = request;
        zero.chapter_count = 0;
        assert!(matches!(
            prepare_requests(vec![zero], None),
            Err(CliRunError::InvalidInput(_))
        ));
    }

    #[test]
    fn validate_output_path_parent_missing() {
        let path = PathBuf::from("/nonexistent_dir_bookgen_xyz/output.epub");
        match validate_output_path(&path) {
            Err(CliRunError::InvalidInput(msg)) => {
                assert!(msg.contains("parent directory does not exist"))
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
        assert!(validate_output_path(&std::env::temp_dir().join("x.epub")).is_ok());
    }

    #[test]
    fn settings_merge_flags_over_config() {
        let args = parse(&["--topic", "x", "--delay", "0"]).unwrap();
        let config: Config = toml::from_str(
            r#"
                chapter_delay_secs = 9
                chapter_max_tokens = 800
                empty_chapters = "keep"
                cover_endpoints = ["https://img.example/{text}"]
            "#,
        )
        .unwrap();
        let s = generation_settings(&args, Some(&config)).unwrap();
        assert_eq!(s.chapters.delay, Duration::ZERO);
        assert_eq!(s.chapters.max_tokens, 800);
        assert_eq!(s.chapters.empty_behavior, EmptyChapterBehavior::Keep);
        assert_eq!(s.outline_max_tokens, DEFAULT_OUTLINE_MAX_TOKENS);
        assert_eq!(s.cover_endpoints, vec!["https://img.example/{text}"]);

        let defaults = generation_settings(&args, None).unwrap();
        assert_eq!(defaults.cover_endpoints, default_endpoints());
    }

    #[test]
    fn bad_config_values_are_invalid_input() {
        let args = parse(&["--topic", "x"]).unwrap();
        let config: Config = toml::from_str(r#"empty_chapters = "skip""#).unwrap();
        assert!(matches!(
            generation_settings(&args, Some(&config)),
            Err(CliRunError::InvalidInput(_))
        ));
        let config: Config = toml::from_str(r#"provider = "other""#).unwrap();
        assert!(select_provider(&args, Some(&config)).is_err());
        assert_eq!(select_provider(&args, None).unwrap(), Provider::OpenAi);
    }

    #[test]
    fn show_tracks_chapter_progress() {
        let bar = ProgressBar::hidden();
        bar.set_length(5);
        show(
            &bar,
            &Event::OutlineReady {
                titles: vec!["a".to_string(), "b".to_string()],
            },
        );
        show(&bar, &Event::ChapterFinished { index: 2, total: 2 });
        assert_eq!(bar.length(), Some(2));
        assert_eq!(bar.position(), 2);
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Book(BookError::Invalid(RequestError::EmptyTopic)).exit_code(),
            1
        );
        assert_eq!(
            CliRunError::Book(BookError::Outline(LlmError::ModelNotFound {
                model: "m".into()
            }))
            .exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Book(BookError::Cover(CoverError::Exhausted {
                attempts: Vec::new()
            }))
            .exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Book(BookError::Epub(EpubError::EmptyTitle)).exit_code(),
            3
        );
        assert_eq!(CliRunError::Validation("epubcheck failed".into()).exit_code(), 3);
        assert_eq!(
            CliRunError::Batch {
                failed: 1,
                total: 2,
                code: 2
            }
            .exit_code(),
            2
        );
    }

    #[test]
    fn cover_timeout_defaults_short_and_follows_config() {
        assert_eq!(cover_timeout_secs(None), 10);
        let config: Config = toml::from_str("timeout_secs = 300\ncover_timeout_secs = 4").unwrap();
        assert_eq!(cover_timeout_secs(Some(&config)), 4);
        let config: Config = toml::from_str("timeout_secs = 300").unwrap();
        assert_eq!(cover_timeout_secs(Some(&config)), DEFAULT_COVER_TIMEOUT_SECS);
    }

    fn compiled(path: &str) -> CompiledBook {
        CompiledBook {
            path: PathBuf::from(path),
            chapters: 2,
            cover_path: PathBuf::from(format!("{}.png", path)),
        }
    }

    #[test]
    fn failed_validation_does_not_stop_the_batch_summary() {
        let checked = std::cell::RefCell::new(Vec::new());
        let check = |p: &Path| {
            checked.borrow_mut().push(p.to_path_buf());
            if p == Path::new("a.epub") {
                Err("epubcheck failed".to_string())
            } else {
                Ok(())
            }
        };
        let results = vec![
            (PathBuf::from("a.epub"), Ok(compiled("a.epub"))),
            (PathBuf::from("b.epub"), Ok(compiled("b.epub"))),
            (
                PathBuf::from("c.epub"),
                Err(BookError::Outline(LlmError::ModelNotFound { model: "m".into() })),
            ),
        ];
        let err = summarize(results, true, 3, true, Some(&check)).unwrap_err();
        assert_eq!(
            *checked.borrow(),
            vec![PathBuf::from("a.epub"), PathBuf::from("b.epub")]
        );
        assert!(matches!(
            err,
            CliRunError::Batch {
                failed: 2,
                total: 3,
                code: 3
            }
        ));
    }

    #[test]
    fn single_book_validation_failure_is_reported() {
        let check = |_: &Path| -> Result<(), String> { Err("epubcheck failed".to_string()) };
        let results = vec![(PathBuf::from("a.epub"), Ok(compiled("a.epub")))];
        let err = summarize(results, false, 1, true, Some(&check)).unwrap_err();
        assert!(matches!(err, CliRunError::Validation(_)));
        assert_eq!(err.exit_code(), 3);

        let results = vec![(PathBuf::from("a.epub"), Ok(compiled("a.epub")))];
        assert!(summarize(results, false, 1, true, None).is_ok());
    }
}
