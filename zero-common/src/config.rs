//! Configuration management for Zero services.
//!
//! Zero services share a configuration directory at `~/.codecoder/`.
//! The core file is `config.json`; module files such as `screener.json`
//! are merged in by [`crate::config_loader`].
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ZERO_* prefix)
//! 2. Module config files (`screener.json`)
//! 3. Core config file (`config.json`)
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ZERO_LOG_LEVEL` → observability.log_level
//! - `ZERO_LOG_FORMAT` → observability.log_format
//! - `ZERO_SCREENER_CACHE_DIR` → screener.cache.dir
//! - `ZERO_SCREENER_QUOTE_TTL` → screener.cache.quote_ttl_secs (accepts "30m", "1h")
//! - `ZERO_SCREENER_REPORT_TTL` → screener.cache.report_ttl_secs (accepts "7d")

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config_loader::load_modular_config;
use crate::error::Error;
use crate::util::parse_duration_secs;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codecoder"),
            |dirs| dirs.home_dir().join(".codecoder"),
        )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration structure for Zero screener services.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Screener module section, kept untyped here and decoded by the
    /// screener service through [`Config::section`].
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub screener: Value,
}

impl Config {
    /// Load configuration from the default directory (`config.json` + module files).
    pub fn load() -> Result<Self> {
        Self::load_dir(config_dir())
    }

    /// Load configuration from a specific directory.
    pub fn load_dir(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            tracing::info!("Config directory not found, using defaults");
            return Ok(Self::default());
        }

        let value = load_modular_config(Some(dir.clone()))?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse config from {}", dir.display()))
    }

    /// Load configuration from a single file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("ZERO_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(dir) = std::env::var("ZERO_SCREENER_CACHE_DIR") {
            set_path(&mut self.screener, &["cache", "dir"], Value::String(dir));
        }

        for (var, field) in [
            ("ZERO_SCREENER_QUOTE_TTL", "quote_ttl_secs"),
            ("ZERO_SCREENER_REPORT_TTL", "report_ttl_secs"),
        ] {
            if let Ok(raw) = std::env::var(var) {
                match parse_duration_secs(&raw) {
                    Ok(secs) => set_path(&mut self.screener, &["cache", field], Value::from(secs)),
                    Err(e) => tracing::warn!(var, value = %raw, error = %e, "Ignoring invalid TTL override"),
                }
            }
        }
    }

    /// Decode a module section into its typed configuration.
    ///
    /// A missing (null) section decodes as the type's default.
    pub fn section<T: DeserializeOwned + Default>(&self, name: &str) -> crate::error::Result<T> {
        let raw = match name {
            "screener" => &self.screener,
            other => {
                return Err(Error::Config(format!("Unknown config section: {other}")));
            }
        };

        if raw.is_null() {
            return Ok(T::default());
        }

        serde_json::from_value(raw.clone())
            .map_err(|e| Error::from(e).with_context(format!("Invalid '{name}' section")))
    }
}

/// Set a nested JSON value, creating intermediate objects as needed.
///
/// Leaves the value untouched if a non-object is found along the path.
fn set_path(root: &mut Value, path: &[&str], value: Value) {
    if root.is_null() {
        *root = Value::Object(Default::default());
    }

    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut cursor = root;
    for key in parents {
        cursor = match cursor {
            Value::Object(obj) => obj
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Default::default())),
            _ => return,
        };
    }

    if let Value::Object(obj) = cursor {
        obj.insert(last.to_string(), value);
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Aliases: "level" for backward compatibility with existing config files
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    /// Aliases: "format" for backward compatibility with existing config files
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to clamp to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
