use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Maximum nesting depth rendered for structured log values.
pub const LOG_RENDER_MAX_DEPTH: usize = 3;

/// Maximum length (in chars) of a rendered structured log value.
pub const LOG_RENDER_MAX_CHARS: usize = 2048;

/// Maximum depth of an error's cause chain carried in a log event.
pub const ERROR_CAUSE_MAX_DEPTH: usize = 3;

/// Placeholder used when a log value cannot be serialized.
pub const UNSERIALIZABLE_PLACEHOLDER: &str = "[unserializable]";

/// Base delay between download retries; attempt `n` waits `n + 1` times this.
pub const RETRY_BACKOFF_MS: u64 = 500;

/// Events buffered per observer before new ones are dropped for it.
pub const OBSERVER_QUEUE_CAPACITY: usize = 1024;

/// Emit a progress log record at most once per this many downloaded bytes.
pub const PROGRESS_LOG_BYTES: u64 = 4 * 1024 * 1024;

/// Top-level configuration for the download engine and its HTTP surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the API server listens on.
    pub bind: String,
    /// Default number of files fetched in parallel per session.
    pub max_concurrency: u32,
    /// Retries per file after the first failed attempt.
    pub max_retries: u32,
    /// Limit on establishing a connection to the upstream.
    pub connect_timeout_secs: u64,
    /// Idle limit between reads. A transfer that keeps receiving bytes is
    /// never cut off, however long it takes in total.
    pub read_timeout_secs: u64,
    /// User-Agent sent with every download request.
    pub user_agent: String,
    /// How long shutdown waits for cancelled sessions to wind down.
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            max_concurrency: 4,
            max_retries: 3,
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            user_agent: concat!("bulk-dl/", env!("CARGO_PKG_VERSION")).to_string(),
            shutdown_grace_secs: 5,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("cannot read config {}: {}", path.display(), e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| anyhow!("invalid config: {}", e))?;
        if config.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be > 0"));
        }
        Ok(config)
    }
}

/// Per-session options supplied with a create request.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct JobConfig {
    /// Paths joined onto the target URL; empty means "fetch the target itself".
    pub files: Vec<String>,
    /// Overrides `EngineConfig::max_concurrency` for this session.
    pub concurrency: Option<u32>,
    /// Re-download files that already exist in the output directory.
    pub overwrite: bool,
}
