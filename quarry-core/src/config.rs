//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/quarry/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/quarry/` (~/.config/quarry/)
//! - State/Logs: `$XDG_STATE_HOME/quarry/` (~/.local/state/quarry/)
//!
//! The backend URL and API key can also be supplied through the
//! `QUARRY_API_URL` and `QUARRY_API_KEY` environment variables, which
//! take precedence over the config file.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Backend connection settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Synchronization cadences and tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the search backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent as the `X-API-Key` header on every request
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl ApiConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("api.base_url must not be empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "api.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Synchronization cadences and tuning
///
/// Poll intervals mirror how quickly each resource is expected to move:
/// document processing status changes within seconds, the conversation
/// list only when a conversation is created or deleted.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Seconds between re-fetches of a document still processing
    #[serde(default = "default_document_poll")]
    pub document_poll_secs: u64,

    /// Seconds between re-fetches of the document list
    #[serde(default = "default_document_poll")]
    pub document_list_poll_secs: u64,

    /// Seconds between re-fetches of an open conversation
    #[serde(default = "default_document_poll")]
    pub conversation_poll_secs: u64,

    /// Seconds between re-fetches of the conversation list
    #[serde(default = "default_conversation_list_poll")]
    pub conversation_list_poll_secs: u64,

    /// Seconds between re-fetches of admin statistics
    #[serde(default = "default_stats_poll")]
    pub stats_poll_secs: u64,

    /// Quiet period before a suggestion fetch is dispatched, in milliseconds
    #[serde(default = "default_suggest_debounce")]
    pub suggest_debounce_ms: u64,

    /// Minimum input length that triggers a suggestion fetch
    #[serde(default = "default_suggest_min_chars")]
    pub suggest_min_chars: usize,

    /// Maximum number of suggestions requested per fetch
    #[serde(default = "default_suggest_limit")]
    pub suggest_limit: usize,

    /// Maximum number of search hits requested per search
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Page size for document list fetches
    #[serde(default = "default_document_page")]
    pub document_page_size: usize,

    /// Page size for conversation list fetches
    #[serde(default = "default_conversation_page")]
    pub conversation_page_size: usize,

    /// Number of prior turns the backend considers when answering
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            document_poll_secs: default_document_poll(),
            document_list_poll_secs: default_document_poll(),
            conversation_poll_secs: default_document_poll(),
            conversation_list_poll_secs: default_conversation_list_poll(),
            stats_poll_secs: default_stats_poll(),
            suggest_debounce_ms: default_suggest_debounce(),
            suggest_min_chars: default_suggest_min_chars(),
            suggest_limit: default_suggest_limit(),
            search_limit: default_search_limit(),
            document_page_size: default_document_page(),
            conversation_page_size: default_conversation_page(),
            context_window: default_context_window(),
        }
    }
}

fn default_document_poll() -> u64 {
    5
}

fn default_conversation_list_poll() -> u64 {
    30
}

fn default_stats_poll() -> u64 {
    10
}

fn default_suggest_debounce() -> u64 {
    300
}

fn default_suggest_min_chars() -> usize {
    2
}

fn default_suggest_limit() -> usize {
    5
}

fn default_search_limit() -> usize {
    10
}

fn default_document_page() -> usize {
    100
}

fn default_conversation_page() -> usize {
    20
}

fn default_context_window() -> u32 {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    ///
    /// Environment overrides are applied after the file is parsed.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env_overrides();
        config.api.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Apply `QUARRY_API_URL` and `QUARRY_API_KEY` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("QUARRY_API_URL") {
            if !url.is_empty() {
                self.api.base_url = url;
            }
        }
        if let Ok(key) = std::env::var("QUARRY_API_KEY") {
            if !key.is_empty() {
                self.api.api_key = Some(key);
            }
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/quarry/config.toml` (~/.config/quarry/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("quarry").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/quarry/` (~/.local/state/quarry/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("quarry")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/quarry/quarry.log` (~/.local/state/quarry/quarry.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("quarry.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
