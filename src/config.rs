//! Optional config file loading. Search order: ./bookgen.toml, then
//! $XDG_CONFIG_HOME/bookgen/config.toml (or ~/.config/bookgen/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Directory for relative output and cover paths. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// Language-model vendor: openai or anthropic.
    pub provider: Option<String>,
    /// Model identifier tried first.
    pub model: Option<String>,
    /// Models tried in order when the selected one is not found.
    pub fallback_models: Option<Vec<String>>,
    /// API origin override, e.g. a local proxy.
    pub api_base_url: Option<String>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Pause in seconds between chapter requests.
    pub chapter_delay_secs: Option<u64>,
    pub outline_max_tokens: Option<u32>,
    pub chapter_max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Timeout in seconds for each cover download.
    pub cover_timeout_secs: Option<u64>,
    /// Cover endpoint templates, tried in order. `{text}` is replaced by the topic.
    pub cover_endpoints: Option<Vec<String>>,
    /// How to handle empty chapter responses: placeholder (default), keep, or fail.
    pub empty_chapters: Option<String>,
}

/// Search order: (1) ./bookgen.toml, (2) $XDG_CONFIG_HOME/bookgen/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("bookgen.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("bookgen").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return read_config(path).map(Some);
        }
    }
    Ok(None)
}

/// Read and parse one config file.
pub fn read_config(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
