//! Engine settings.
//!
//! Every field has a default, so an empty document (or no document at all)
//! yields a working engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PulseError, PulseResult};

/// Main engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Collection window settings
    #[serde(default)]
    pub collection: CollectionSettings,

    /// Per-stream document quotas
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collection: CollectionSettings::default(),
            quota: QuotaConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> PulseResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> PulseResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load settings from a `.yaml`, `.yml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> PulseResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            Some("json") => Self::from_json_str(&text),
            other => Err(PulseError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Length of one collection window.
    pub fn collection_interval(&self) -> Duration {
        Duration::from_millis(self.collection.interval_ms.max(1))
    }
}

/// Collection window settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSettings {
    /// Window length in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

/// Document quota per stream and telemetry kind.
///
/// Quota replenishes continuously at `max_documents_per_minute / 60` per
/// second and never exceeds `max_documents_per_minute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_max_documents_per_minute")]
    pub max_documents_per_minute: u32,

    #[serde(default = "default_initial_documents")]
    pub initial_documents: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_documents_per_minute: default_max_documents_per_minute(),
            initial_documents: default_initial_documents(),
        }
    }
}

impl QuotaConfig {
    /// A quota large enough that it never throttles.
    pub fn unlimited() -> Self {
        Self {
            max_documents_per_minute: u32::MAX,
            initial_documents: u32::MAX,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_documents_per_minute() -> u32 {
    30
}

fn default_initial_documents() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}
