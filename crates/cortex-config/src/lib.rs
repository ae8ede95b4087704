use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorDefaults {
    /// Minimum inter-request gap, in milliseconds, enforced per provider
    /// before a connector is allowed to issue another fetch.
    pub chat_platform_gap_ms: u64,
    pub structured_notes_gap_ms: u64,
    /// Fallback gap applied to any provider without a dedicated entry.
    pub default_gap_ms: u64,
    pub max_retry_attempts: u32,
}

impl Default for ConnectorDefaults {
    fn default() -> Self {
        Self {
            chat_platform_gap_ms: 20,
            structured_notes_gap_ms: 350,
            default_gap_ms: 0,
            max_retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWeights {
    pub hybrid_alpha: f64,
    pub agent_match_boost: f64,
    pub channel_match_boost: f64,
    pub recency_today: f64,
    pub recency_week: f64,
    pub recency_month: f64,
    pub recency_older: f64,
    pub source_weight_manual: f64,
    pub source_weight_connector: f64,
    pub decay_base: f64,
    pub decay_slope: f64,
    pub stale_threshold: f64,
    pub default_limit: usize,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.5,
            agent_match_boost: 1.15,
            channel_match_boost: 1.10,
            recency_today: 1.20,
            recency_week: 1.10,
            recency_month: 1.05,
            recency_older: 1.00,
            source_weight_manual: 1.05,
            source_weight_connector: 0.97,
            decay_base: 0.5,
            decay_slope: 0.6,
            stale_threshold: 0.5,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Directory scanned for `*.toml` preset overrides; `None` disables
    /// custom presets and falls back to the built-ins only.
    pub presets_dir: Option<String>,
    pub max_context_chars: usize,
    pub max_iterations: u32,
    pub max_depth: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            presets_dir: None,
            max_context_chars: 8000,
            max_iterations: 8,
            max_depth: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CortexConfig {
    pub connectors: ConnectorDefaults,
    pub search: SearchWeights,
    pub reasoning: ReasoningConfig,
    pub telemetry: TelemetryConfig,
}

impl CortexConfig {
    /// Loads configuration from `path`, falling back to defaults for any
    /// field the file omits and for the file itself if it does not exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn gap_ms_for(&self, provider: &str) -> u64 {
        match provider {
            "chat-platform" => self.connectors.chat_platform_gap_ms,
            "structured-notes" => self.connectors.structured_notes_gap_ms,
            _ => self.connectors.default_gap_ms,
        }
    }
}
