//! Application configuration file (TOML).
//!
//! The config file is optional, a missing file yields `AppConfig::default()`.
//! Unknown keys are accepted by serde but logged as a warning so typos are
//! visible at startup.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Runtime bot settings (token, chat, pause flag) live in the database, not
/// here; this file only holds deployment wiring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// RSS feed to poll.
    pub feed_url: String,

    /// Template for post links in notifications; `{id}` is replaced with the
    /// post's external id.
    pub post_url_template: String,

    /// SQLite database file path.
    pub database_path: String,

    /// Bot API base URL, overridable for self-hosted gateways and tests.
    pub telegram_api_base: String,

    /// Per-request feed fetch timeout.
    pub fetch_timeout_secs: u64,

    /// Seconds between ingestion cycles.
    pub tick_interval_secs: u64,

    /// Posts older than this are deleted during cleanup.
    pub retention_hours: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed_url: "https://rss.nodeseek.com".to_string(),
            post_url_template: "https://www.nodeseek.com/post-{id}-1".to_string(),
            database_path: "pigeon.db".to_string(),
            telegram_api_base: crate::notify::DEFAULT_API_BASE.to_string(),
            fetch_timeout_secs: 10,
            tick_interval_secs: 60,
            retention_hours: 24,
        }
    }
}

impl AppConfig {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(AppConfig::default())`
    /// - Empty file → `Ok(AppConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to surface unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "feed_url",
                "post_url_template",
                "database_path",
                "telegram_api_base",
                "fetch_timeout_secs",
                "tick_interval_secs",
                "retention_hours",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: AppConfig = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), feed_url = %config.feed_url, "Loaded configuration");
        Ok(config)
    }
}
