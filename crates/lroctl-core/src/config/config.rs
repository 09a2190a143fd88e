//! Configuration management for lroctl
//!
//! Handles loading the TOML config file that supplies default wait settings.
//! Command-line flags are applied on top of what is loaded here.

#[cfg(target_os = "macos")]
use directories::BaseDirs;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{ConfigError, Result};
use crate::error::WaitError;
use crate::schedule::{RetryBudgetConfig, RetrySchedule};
use crate::tracker::TrackerStyle;

/// Environment variable naming an explicit config file
pub const CONFIG_FILE_ENV: &str = "LROCTL_CONFIG_FILE";

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Polling schedule defaults
    #[serde(default)]
    pub schedule: RetrySchedule,
    /// How many transient poll failures to tolerate
    #[serde(default)]
    pub retry_budget: RetryBudgetConfig,
    /// Progress presentation
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// `[progress]` section
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ProgressConfig {
    #[serde(default)]
    pub style: TrackerStyle,
}

impl Config {
    /// Load configuration from the standard location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields the defaults.
    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::LoadError {
            path: config_path.display().to_string(),
            source: e,
        })?;

        // Expand environment variables in the config content
        let expanded_content = Self::expand_env_vars(&content);

        let config: Config = toml::from_str(&expanded_content)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to the standard location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to_path(&config_path)
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::SaveError {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let content = toml::to_string_pretty(self)?;

        fs::write(config_path, content).map_err(|e| ConfigError::SaveError {
            path: config_path.display().to_string(),
            source: e,
        })?;

        Ok(())
    }

    /// Check every section for values the engine would reject
    pub fn validate(&self) -> Result<()> {
        self.schedule
            .validate()
            .map_err(|e| ConfigError::Invalid {
                section: "schedule".to_string(),
                reason: match e {
                    WaitError::Config(reason) => reason,
                    other => other.to_string(),
                },
            })?;
        if self.retry_budget.window_secs == 0 {
            return Err(ConfigError::Invalid {
                section: "retry_budget".to_string(),
                reason: "window_secs must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Get the path to the configuration file
    ///
    /// `LROCTL_CONFIG_FILE` wins when set. Otherwise:
    ///
    /// On macOS, this supports both the standard macOS path and Linux-style ~/.config path:
    /// 1. Check ~/.config/lroctl/config.toml (Linux-style, preferred for consistency)
    /// 2. Fall back to ~/Library/Application Support/com.lroctl.lroctl/config.toml (macOS standard)
    ///
    /// On Linux: ~/.config/lroctl/config.toml
    /// On Windows: %APPDATA%\lroctl\lroctl\config.toml
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }

        #[cfg(target_os = "macos")]
        {
            if let Some(base_dirs) = BaseDirs::new() {
                let linux_style_path = base_dirs
                    .home_dir()
                    .join(".config")
                    .join("lroctl")
                    .join("config.toml");

                if linux_style_path
                    .parent()
                    .map(|p| p.exists())
                    .unwrap_or(false)
                {
                    return Ok(linux_style_path);
                }
            }
        }

        let proj_dirs =
            ProjectDirs::from("com", "lroctl", "lroctl").ok_or(ConfigError::ConfigDirError)?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Expand environment variables in configuration content
    ///
    /// Supports ${VAR} and ${VAR:-default} syntax. Unset variables without a
    /// default are left as written.
    ///
    /// Example:
    /// ```toml
    /// [schedule]
    /// max_wait_seconds = ${LROCTL_MAX_WAIT:-1800}
    /// ```
    fn expand_env_vars(content: &str) -> String {
        let expanded =
            shellexpand::env_with_context_no_errors(content, |var| std::env::var(var).ok());
        expanded.to_string()
    }
}
