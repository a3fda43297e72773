use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use crate::codec::DEFAULT_MAX_FRAME;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level configuration structure loaded from `config.json`.
//
// It defines:
// - Where the mothership listens (and where workers connect)
// - How a worker crawls
// - Optional debug configuration
//
// Both roles read the same file so that host/port can never
// drift apart between them.
//
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Mothership (collector) settings
    #[serde(default)]
    pub mothership: MothershipConfig,

    /// Worker settings; required only when running a worker
    pub worker: Option<WorkerConfig>,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    /// Whether wire-level debug logging is enabled.
    pub fn debug_log(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }
}

// ------------------------------------------------------------
// Mothership configuration
// ------------------------------------------------------------
//
// Notes:
// - `buffer_size` bounds one framed message, not a single read.
// - `idle_timeout_secs` closes connections that stay silent.
//
#[derive(Debug, Deserialize, Clone)]
pub struct MothershipConfig {
    /// Listen / connect host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen / connect port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum size of one framed message, in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Per-connection inactivity timeout, in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl MothershipConfig {
    /// `host:port`, suitable for both bind and connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for MothershipConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            buffer_size: default_buffer_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// What to do with a link whose fetch retries are used up.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetriesExhausted {
    /// Mark it visited so it is never tried again (default)
    #[default]
    MarkVisited,

    /// Drop it without marking it visited; a later page may re-admit it
    /// while budget remains
    Release,
}

// ------------------------------------------------------------
// Worker configuration
// ------------------------------------------------------------
//
// Configuration for a single crawl worker.
//
// IMPORTANT:
// - `max_links` counts the seed.
// - `demo` disables sending data to the mothership (local testing).
//
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Page the worker is launched to process
    pub seed: String,

    /// Identifier announced to the mothership
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Link budget (seed included)
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Retries after the first failed fetch of a link
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Base delay before retrying a failed link
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Policy once retries are used up
    #[serde(default)]
    pub on_retries_exhausted: RetriesExhausted,

    /// HTTP request timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// HTTP user agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Demo mode flag (nothing sent, only logged)
    pub demo: Option<bool>,
}

impl WorkerConfig {
    /// Worker settings with defaults for everything but the seed.
    pub fn new(seed: &str) -> Self {
        Self {
            seed: seed.to_string(),
            worker_id: default_worker_id(),
            max_links: default_max_links(),
            fetch_retries: default_fetch_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            on_retries_exhausted: RetriesExhausted::default(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            demo: None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn is_demo(&self) -> bool {
        self.demo.unwrap_or(false)
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Enables per-message wire logging and debug-level logs
    pub log: Option<bool>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_buffer_size() -> usize {
    DEFAULT_MAX_FRAME
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

fn default_max_links() -> usize {
    10
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("crawl-mothership-worker/", env!("CARGO_PKG_VERSION")).to_string()
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&data)
}

/// Parse configuration from a JSON string.
pub fn parse_config(data: &str) -> anyhow::Result<Config> {
    let cfg: Config = serde_json::from_str(data)?;
    if cfg.mothership.buffer_size == 0 {
        anyhow::bail!("mothership.buffer_size must be greater than 0");
    }
    Ok(cfg)
}
