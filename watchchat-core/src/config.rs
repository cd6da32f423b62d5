//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/watchchat/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/watchchat/` (~/.config/watchchat/)
//! - Data: `$XDG_DATA_HOME/watchchat/` (~/.local/share/watchchat/)
//! - State/Logs: `$XDG_STATE_HOME/watchchat/` (~/.local/state/watchchat/)

use crate::error::{Error, Result};
use crate::types::{GenerationConfig, ThinkingConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

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

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
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
    /// Endpoints of the credential and model services
    #[serde(default)]
    pub services: ServicesConfig,

    /// Sampling parameters sent with every reply request
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Streaming transport policy
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Remote archive layout and auto-save
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Chat presentation defaults
    #[serde(default)]
    pub chat: ChatConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service endpoints
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    /// Issues temporary object-store credentials (GET)
    #[serde(default = "default_credential_url")]
    pub credential_url: String,

    /// Atomic reply endpoint (POST)
    #[serde(default = "default_model_url")]
    pub model_url: String,

    /// Streaming (SSE) reply endpoint (POST)
    #[serde(default = "default_model_stream_url")]
    pub model_stream_url: String,

    /// HTTP request timeout in seconds for non-streaming calls
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            credential_url: default_credential_url(),
            model_url: default_model_url(),
            model_stream_url: default_model_stream_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_credential_url() -> String {
    "http://localhost:3000/api/cos-credentials".to_string()
}

fn default_model_url() -> String {
    "http://localhost:3000/api/generate-text".to_string()
}

fn default_model_stream_url() -> String {
    "http://localhost:3000/api/generate-text-stream".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// Generation parameters
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            thinking_budget: default_thinking_budget(),
        }
    }
}

impl GenerationSettings {
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn thinking_config(&self) -> ThinkingConfig {
        ThinkingConfig {
            thinking_budget: self.thinking_budget,
        }
    }
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_output_tokens() -> u32 {
    65536
}

fn default_thinking_budget() -> u32 {
    32768
}

/// Streaming transport policy
#[derive(Debug, Deserialize, Clone)]
pub struct StreamingConfig {
    /// Prefer the streaming transport (falls back to atomic on failure)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds allowed before the first non-empty text arrives
    #[serde(default = "default_stream_timeout")]
    pub first_byte_timeout_secs: u64,

    /// Seconds allowed between text updates once streaming has started
    #[serde(default = "default_stream_timeout")]
    pub stall_timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            first_byte_timeout_secs: default_stream_timeout(),
            stall_timeout_secs: default_stream_timeout(),
        }
    }
}

impl StreamingConfig {
    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_secs(self.first_byte_timeout_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.first_byte_timeout_secs == 0 {
            return Err(Error::Config(
                "streaming.first_byte_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.stall_timeout_secs == 0 {
            return Err(Error::Config(
                "streaming.stall_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_stream_timeout() -> u64 {
    8
}

/// Remote archive configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Save the conversation after every successful reply
    #[serde(default = "default_true")]
    pub auto_save: bool,

    /// Reserved object holding the title index
    #[serde(default = "default_index_key")]
    pub index_key: String,

    /// Extension of conversation objects
    #[serde(default = "default_object_suffix")]
    pub object_suffix: String,

    /// Object-store base URL override. `{bucket}` and `{region}` are substituted.
    pub endpoint: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            index_key: default_index_key(),
            object_suffix: default_object_suffix(),
            endpoint: None,
        }
    }
}

impl ArchiveConfig {
    /// Resolve the object-store base URL for a bucket/region pair.
    pub fn endpoint_for(&self, bucket: &str, region: &str) -> String {
        let template = self
            .endpoint
            .clone()
            .unwrap_or_else(default_endpoint_template);
        template
            .replace("{bucket}", bucket)
            .replace("{region}", region)
            .trim_end_matches('/')
            .to_string()
    }
}

fn default_index_key() -> String {
    "meta/watch-index.json".to_string()
}

fn default_object_suffix() -> String {
    ".json".to_string()
}

fn default_endpoint_template() -> String {
    "https://{bucket}.cos.{region}.myqcloud.com".to_string()
}

/// Chat presentation defaults
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Canned opening message seeded into every new conversation
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Title used when nothing usable can be derived from the transcript
    #[serde(default = "default_placeholder_title")]
    pub placeholder_title: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            placeholder_title: default_placeholder_title(),
        }
    }
}

fn default_greeting() -> String {
    "Hello! I'm ready when you are.".to_string()
}

fn default_placeholder_title() -> String {
    "New conversation".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.streaming.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/watchchat/config.toml` (~/.config/watchchat/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("watchchat").join("config.toml")
    }

    /// Returns the data directory path (for the local buffer database)
    ///
    /// `$XDG_DATA_HOME/watchchat/` (~/.local/share/watchchat/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("watchchat")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/watchchat/` (~/.local/state/watchchat/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("watchchat")
    }

    /// Returns the buffer database file path
    ///
    /// `$XDG_DATA_HOME/watchchat/buffer.db` (~/.local/share/watchchat/buffer.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("buffer.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/watchchat/watchchat.log` (~/.local/state/watchchat/watchchat.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("watchchat.log")
    }

    /// Request timeout applied to credential, atomic model and object-store calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.services.timeout_secs)
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.streaming.enabled);
        assert_eq!(config.streaming.first_byte_timeout(), Duration::from_secs(8));
        assert_eq!(config.streaming.stall_timeout(), Duration::from_secs(8));
        assert!(config.archive.auto_save);
        assert_eq!(config.archive.index_key, "meta/watch-index.json");
        assert_eq!(config.generation.max_output_tokens, 65536);
        assert_eq!(config.generation.thinking_budget, 32768);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[services]
credential_url = "https://chat.example.com/api/cos-credentials"

[streaming]
stall_timeout_secs = 3

[archive]
auto_save = false

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.services.credential_url,
            "https://chat.example.com/api/cos-credentials"
        );
        assert_eq!(config.streaming.stall_timeout_secs, 3);
        assert_eq!(config.streaming.first_byte_timeout_secs, 8);
        assert!(!config.archive.auto_save);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_streaming_validation() {
        assert!(StreamingConfig::default().validate().is_ok());

        let config = StreamingConfig {
            stall_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_template() {
        let archive = ArchiveConfig::default();
        assert_eq!(
            archive.endpoint_for("chats-1250000000", "ap-guangzhou"),
            "https://chats-1250000000.cos.ap-guangzhou.myqcloud.com"
        );

        let archive = ArchiveConfig {
            endpoint: Some("http://127.0.0.1:9000/{bucket}/".to_string()),
            ..Default::default()
        };
        assert_eq!(
            archive.endpoint_for("b", "r"),
            "http://127.0.0.1:9000/b"
        );
    }
}
