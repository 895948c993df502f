//! Configuration types for Webtap

use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Result, WebtapError};

/// Main capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Initial navigation target (consumed by the browsing UI, not the core)
    #[serde(default)]
    pub target_url: Option<String>,
    /// Base directory for session archives
    pub output_folder: PathBuf,
    /// User agent advertised by the navigation host
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Initial window width
    #[serde(default = "default_win_width")]
    pub win_width: u32,
    /// Initial window height
    #[serde(default = "default_win_height")]
    pub win_height: u32,
    /// Strip bearer-token signatures, cookie values and secret body fields
    #[serde(default)]
    pub redact_secrets: bool,
    /// Opt in to response-body persistence
    #[serde(default)]
    pub capture_bodies: bool,
    /// Maximum body size eligible for persistence
    #[serde(default = "default_body_max_bytes")]
    pub capture_body_max_bytes: usize,
    /// Regex matched against response content-type; only matches are persisted
    #[serde(default = "default_body_types")]
    pub capture_body_types: String,
    /// Attach the diagnostic channel bridge
    #[serde(default)]
    pub enable_cdp: bool,
}

fn default_win_width() -> u32 {
    1280
}

fn default_win_height() -> u32 {
    860
}

fn default_body_max_bytes() -> usize {
    2 * 1024 * 1024 // 2 MB
}

fn default_body_types() -> String {
    "json|text|javascript|xml".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_url: None,
            output_folder: PathBuf::from("captures"),
            user_agent: None,
            win_width: default_win_width(),
            win_height: default_win_height(),
            redact_secrets: false,
            capture_bodies: false,
            capture_body_max_bytes: default_body_max_bytes(),
            capture_body_types: default_body_types(),
            enable_cdp: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WebtapError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| WebtapError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.output_folder.as_os_str().is_empty() {
            return Err(WebtapError::ConfigError(
                "output_folder cannot be empty".to_string(),
            ));
        }

        if let Some(parent) = self.output_folder.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(WebtapError::ConfigError(format!(
                    "Parent of output folder does not exist: {}",
                    parent.display()
                )));
            }
        }

        if self.capture_bodies && self.capture_body_max_bytes == 0 {
            return Err(WebtapError::ConfigError(
                "capture_body_max_bytes must be > 0 when capture_bodies is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Compile the body-type filter.
    ///
    /// An invalid pattern disables persistence (returns `None`) rather than
    /// failing the session.
    pub fn body_type_filter(&self) -> Option<Regex> {
        match Regex::new(&self.capture_body_types) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Invalid capture_body_types pattern, persistence disabled: {e}");
                None
            }
        }
    }
}
