//! Configuration loading and config file resolution
//!
//! Settings come from a single TOML file. Every field has a built-in default,
//! so a missing file (or a file with missing sections) is never fatal.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (applied by the binary after loading)
//! 2. Environment variables (`DUB_CONFIG`, `DUB_BACKEND_URL`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DUB_CONFIG";

/// Environment variable overriding `backend.base_url`
pub const BACKEND_URL_ENV_VAR: &str = "DUB_BACKEND_URL";

/// Top-level TOML configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    /// Streaming session tuning
    pub session: SessionSettings,

    /// Dubbing backend connection
    pub backend: BackendSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Streaming session tuning parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Target number of segments outstanding or queued ahead of playback
    pub window: usize,

    /// Total provider attempts for one segment before it is skipped
    pub fetch_attempts: u32,

    /// Delay between fetch attempts
    pub fetch_retry_delay_ms: u64,

    /// Delay before resubmitting a failed append
    pub append_retry_delay_ms: u64,

    /// Period of the look-ahead safety tick
    pub tick_interval_ms: u64,

    /// Broadcast capacity of the session event bus
    pub event_bus_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            window: 3,
            fetch_attempts: 3,
            fetch_retry_delay_ms: 1000,
            append_retry_delay_ms: 100,
            tick_interval_ms: 1000,
            event_bus_capacity: 256,
        }
    }
}

impl SessionSettings {
    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    pub fn append_retry_delay(&self) -> Duration {
        Duration::from_millis(self.append_retry_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject values that would stall or spin a session
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::Config("session.window must be at least 1".to_string()));
        }
        if self.fetch_attempts == 0 {
            return Err(Error::Config(
                "session.fetch_attempts must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("fetch_retry_delay_ms", self.fetch_retry_delay_ms),
            ("append_retry_delay_ms", self.append_retry_delay_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("session.{} must be non-zero", name)));
            }
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::Config(
                "session.event_bus_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dubbing backend connection and voice settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL of the dubbing backend
    pub base_url: String,

    /// Per-request timeout
    pub timeout_ms: u64,

    /// Transcript source language (`auto` lets the backend detect it)
    pub source_language: String,

    /// Dub target language
    pub target_language: String,

    /// Speech synthesis voice
    pub tts_voice: String,

    /// Translation engine name
    pub translator: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_ms: 30_000,
            source_language: "auto".to_string(),
            target_language: "vi".to_string(),
            tts_voice: "vi-VN-HoaiMyNeural".to_string(),
            translator: "AzureTranslator".to_string(),
        }
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.session.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration
    ///
    /// An explicitly named file (CLI argument or `DUB_CONFIG`) must exist and
    /// parse. The platform default location is optional: when absent, built-in
    /// defaults are used. `DUB_BACKEND_URL` is applied last.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::load(&path)?
            }
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    info!("Loading configuration from {}", path.display());
                    Self::load(&path)?
                }
                _ => {
                    warn!("No config file found, using built-in defaults");
                    Self::default()
                }
            },
        };

        if let Ok(url) = std::env::var(BACKEND_URL_ENV_VAR) {
            config.backend.base_url = url;
        }

        Ok(config)
    }
}

/// Platform config location: `<config_dir>/dub-player/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dub-player").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.session.window, 3);
        assert_eq!(config.session.fetch_attempts, 3);
        assert_eq!(config.session.fetch_retry_delay(), Duration::from_secs(1));
        assert_eq!(config.session.append_retry_delay(), Duration::from_millis(100));
        assert_eq!(config.session.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.backend.target_language, "vi");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [session]
            window = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.session.window, 5);
        assert_eq!(config.session.fetch_attempts, 3);
        assert_eq!(config.backend.base_url, "http://127.0.0.1:8000");
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = TomlConfig::from_toml_str("[session]\nwindow = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = TomlConfig::from_toml_str("[session]\nfetch_attempts = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = TomlConfig::from_toml_str("[session\nwindow = ").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
