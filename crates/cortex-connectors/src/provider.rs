//! The `Provider` contract consumed by the sync engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::Result;
use cortex_core::model::MemoryClass;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One fetched item from a provider, pre-mapping. The sync engine turns
/// this into a [`cortex_core::model::Memory`]; `external_id` never leaves
/// this crate except as a log key.
#[derive(Debug, Clone)]
pub struct Record {
    pub external_id: String,
    pub content: String,
    /// Human-readable path inside the provider. The sync engine prefixes
    /// it with the provider name to build `memory.source_file`.
    pub source: String,
    pub section: Option<String>,
    pub project: Option<String>,
    pub memory_class: MemoryClass,
    pub timestamp: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub provider_meta: Option<Value>,
}

impl Record {
    pub fn new(external_id: impl Into<String>, content: impl Into<String>, source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            external_id: external_id.into(),
            content: content.into(),
            source: source.into(),
            section: None,
            project: None,
            memory_class: MemoryClass::empty(),
            timestamp,
            agent_id: None,
            provider_meta: None,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable, lowercase identifier used as the registry key and as the
    /// `"<provider>:"` prefix of `memory.source_file`.
    fn name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    /// JSON template shown to a user configuring this connector.
    fn default_config(&self) -> Value;
    /// Actionable validation; returns `CortexError::InvalidConfig` on the
    /// first violated constraint.
    fn validate_config(&self, cfg: &Value) -> Result<()>;

    /// Fetch records modified after `since` (when honorable). Must be
    /// idempotent — the sync engine relies on content-hash dedup, not on
    /// provider-side cursor persistence, across cycles.
    async fn fetch(
        &self,
        cfg: &Value,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>>;
}

/// Extracts a required string field, or an InvalidConfig error naming the field.
pub fn require_str<'a>(cfg: &'a Value, field: &str) -> Result<&'a str> {
    cfg.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| cortex_core::error::CortexError::InvalidConfig(format!("{field} is required")))
}

pub fn opt_str<'a>(cfg: &'a Value, field: &str) -> Option<&'a str> {
    cfg.get(field).and_then(|v| v.as_str())
}

pub fn opt_bool(cfg: &Value, field: &str, default: bool) -> bool {
    cfg.get(field).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn opt_u64(cfg: &Value, field: &str, default: u64) -> u64 {
    cfg.get(field).and_then(|v| v.as_u64()).unwrap_or(default)
}

pub fn require_str_array<'a>(cfg: &'a Value, field: &str) -> Result<Vec<&'a str>> {
    let arr = cfg
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| cortex_core::error::CortexError::InvalidConfig(format!("{field} is required")))?;
    if arr.is_empty() {
        return Err(cortex_core::error::CortexError::InvalidConfig(format!(
            "{field} must be non-empty"
        )));
    }
    arr.iter()
        .map(|v| {
            v.as_str().ok_or_else(|| {
                cortex_core::error::CortexError::InvalidConfig(format!("{field} entries must be strings"))
            })
        })
        .collect()
}
