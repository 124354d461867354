//! dub-player specific configuration
//!
//! Turns the TOML settings from dub-common into the runtime values a session
//! uses, and applies command-line overrides on top.

use crate::error::Result;
use dub_common::config::{BackendSettings, SessionSettings, TomlConfig};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Runtime tuning for one streaming session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Max segments requested, cached, queued or appending at once
    pub window: usize,

    /// Total provider attempts per segment before it is skipped
    pub fetch_attempts: u32,

    /// Fixed back-off between fetch attempts
    pub fetch_retry_delay: Duration,

    /// Fixed delay before resubmitting a failed append
    pub append_retry_delay: Duration,

    /// Look-ahead safety tick period
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            window: settings.window,
            fetch_attempts: settings.fetch_attempts,
            fetch_retry_delay: settings.fetch_retry_delay(),
            append_retry_delay: settings.append_retry_delay(),
            tick_interval: settings.tick_interval(),
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub window: Option<usize>,
    pub backend_url: Option<String>,
    pub log_level: Option<String>,
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub backend: BackendSettings,
    pub log_level: String,
    pub event_bus_capacity: usize,
}

impl Config {
    /// Load configuration from TOML (see `TomlConfig::resolve`) and apply
    /// command-line overrides
    pub fn load(toml_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let toml_config = TomlConfig::resolve(toml_path)?;
        Ok(Self::from_toml(toml_config, overrides))
    }

    pub fn from_toml(toml_config: TomlConfig, overrides: ConfigOverrides) -> Self {
        let mut session = SessionConfig::from_settings(&toml_config.session);
        if let Some(window) = overrides.window {
            info!("Window: {} (from CLI override)", window);
            session = session.with_window(window);
        }

        let mut backend = toml_config.backend;
        if let Some(url) = overrides.backend_url {
            info!("Backend URL: {} (from CLI override)", url);
            backend.base_url = url;
        }

        Self {
            session,
            backend,
            log_level: overrides.log_level.unwrap_or(toml_config.logging.level),
            event_bus_capacity: toml_config.session.event_bus_capacity,
        }
    }
}
