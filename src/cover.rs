//! Cover image fetching. Walks the configured endpoints in order and saves the first image.

use crate::fallback::{Candidates, Walk};
use crate::llm::ApiClient;
use crate::model::CoverAsset;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Primary endpoint. `{text}` is replaced with the encoded topic.
pub const PRIMARY_ENDPOINT: &str = "https://via.placeholder.com/600x800.png?text={text}";
/// Secondary endpoint with the other service's URL conventions.
pub const SECONDARY_ENDPOINT: &str = "https://dummyimage.com/600x800/cccccc/000000&text={text}";

/// Per-request timeout for cover downloads, in seconds.
pub const DEFAULT_COVER_TIMEOUT_SECS: u64 = 10;

pub fn default_endpoints() -> Vec<String> {
    vec![PRIMARY_ENDPOINT.to_string(), SECONDARY_ENDPOINT.to_string()]
}

/// Why one endpoint did not yield an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Transport(String),
    Status(u16),
    Body(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Transport(e) => write!(f, "{}", e),
            FetchFailure::Status(s) => write!(f, "HTTP {}", s),
            FetchFailure::Body(e) => write!(f, "could not read body: {}", e),
        }
    }
}

/// One failed endpoint attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    pub url: String,
    pub failure: FetchFailure,
}

/// Cover fetching failed.
#[derive(Debug, Error)]
pub enum CoverError {
    #[error("No cover endpoints configured.")]
    NoEndpoints,

    #[error("Cover image could not be fetched from any endpoint: {}", summarize(.attempts))]
    Exhausted { attempts: Vec<FetchAttempt> },

    #[error("Failed to save cover image: {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn summarize(attempts: &[FetchAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.url, a.failure))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Source of image bytes for a URL.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure>;
}

impl ImageSource for ApiClient {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        let response = self
            .get(url)
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchFailure::Body(e.to_string()))
    }
}

/// Encode text for a URL: spaces become `+`, unreserved ASCII passes, the rest is %XX.
pub fn encode_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.trim().bytes() {
        match b {
            b' ' => out.push('+'),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Substitute the encoded text into an endpoint template. Templates without `{text}` get it
/// appended.
pub fn endpoint_url(template: &str, text: &str) -> String {
    let encoded = encode_text(text);
    if template.contains("{text}") {
        template.replace("{text}", &encoded)
    } else {
        format!("{}{}", template, encoded)
    }
}

/// Fetch a cover for `topic` and write it verbatim to `dest`.
///
/// Endpoints are tried in order, each once; any failure advances to the next. `on_failure`
/// sees every failed attempt as it happens.
pub fn fetch_cover(
    source: &dyn ImageSource,
    endpoints: &[String],
    topic: &str,
    dest: &Path,
    on_failure: &dyn Fn(&FetchAttempt),
) -> Result<CoverAsset, CoverError> {
    let urls = Candidates::new(endpoints.iter().map(|t| endpoint_url(t, topic)).collect())
        .ok_or(CoverError::NoEndpoints)?;
    let walk = urls.walk(
        |url| {
            debug!(url = %url, "fetching cover image");
            source.fetch(url).map_err(|failure| {
                let attempt = FetchAttempt {
                    url: url.clone(),
                    failure,
                };
                warn!(url = %attempt.url, reason = %attempt.failure, "cover endpoint failed");
                on_failure(&attempt);
                attempt
            })
        },
        |_| true,
    );
    let (url, bytes) = match walk {
        Walk::Found {
            candidate, value, ..
        } => (candidate, value),
        Walk::Halted { failure, failures } => {
            let mut attempts: Vec<FetchAttempt> = failures.into_iter().map(|f| f.error).collect();
            attempts.push(failure.error);
            return Err(CoverError::Exhausted { attempts });
        }
        Walk::Exhausted { failures } => {
            return Err(CoverError::Exhausted {
                attempts: failures.into_iter().map(|f| f.error).collect(),
            })
        }
    };
    std::fs::write(dest, &bytes).map_err(|e| CoverError::Write {
        path: dest.to_path_buf(),
        source: e,
    })?;
    debug!(path = %dest.display(), bytes = bytes.len(), "cover image written");
    Ok(CoverAsset {
        path: dest.to_path_buf(),
        bytes,
        source_url: url,
    })
}
