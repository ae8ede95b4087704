//! The three persistent primitives — memory, fact, edge — plus the
//! connector row that tracks per-provider sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// `content_hash = SHA256(content || 0x00 || source_file)`, hex-encoded.
///
/// Re-imports of the same `(content, source_file)` pair collide on this
/// hash, which the store enforces as a unique constraint.
pub fn content_hash(content: &str, source_file: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(source_file.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Free-form memory classification. Known values are named; anything else
/// is carried as `Other` so providers can emit novel classes without a
/// core change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryClass {
    Decision,
    Status,
    Rule,
    Preference,
    Identity,
    Reference,
    #[serde(untagged)]
    Other(String),
}

impl MemoryClass {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryClass::Decision => "decision",
            MemoryClass::Status => "status",
            MemoryClass::Rule => "rule",
            MemoryClass::Preference => "preference",
            MemoryClass::Identity => "identity",
            MemoryClass::Reference => "reference",
            MemoryClass::Other(s) => s.as_str(),
        }
    }

    pub fn empty() -> Self {
        MemoryClass::Other(String::new())
    }
}

impl std::fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for MemoryClass {
    fn from(s: &str) -> Self {
        match s {
            "decision" => MemoryClass::Decision,
            "status" => MemoryClass::Status,
            "rule" => MemoryClass::Rule,
            "preference" => MemoryClass::Preference,
            "identity" => MemoryClass::Identity,
            "reference" => MemoryClass::Reference,
            other => MemoryClass::Other(other.to_string()),
        }
    }
}

/// Metadata bag carried on a memory. At least `agent_id`/`channel` are
/// expected by the search engine's boost logic, but both are optional.
pub type Metadata = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub content: String,
    /// `"<provider>:<record.source>"`, or a bare file path for manual imports.
    pub source_file: String,
    pub source_section: Option<String>,
    pub source_line: Option<u32>,
    pub content_hash: String,
    pub project: Option<String>,
    pub memory_class: MemoryClass,
    pub metadata: Option<Metadata>,
    pub imported_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Construct a new memory with a freshly computed `content_hash`.
    /// `id` is assigned by the store on insert; `0` is a placeholder.
    pub fn new(content: impl Into<String>, source_file: impl Into<String>) -> Self {
        let content = content.into();
        let source_file = source_file.into();
        let hash = content_hash(&content, &source_file);
        let now = Utc::now();
        Self {
            id: 0,
            content,
            source_file,
            source_section: None,
            source_line: None,
            content_hash: hash,
            project: None,
            memory_class: MemoryClass::empty(),
            metadata: None,
            imported_at: now,
            updated_at: now,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("agent_id"))
            .and_then(|v| v.as_str())
    }

    pub fn channel(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("channel"))
            .and_then(|v| v.as_str())
    }

    /// True when `source_file` begins with `<provider>:`, i.e. this memory
    /// originated from a connector rather than manual/file import.
    pub fn is_connector_sourced(&self, known_providers: &[&str]) -> bool {
        known_providers
            .iter()
            .any(|p| self.source_file.starts_with(&format!("{p}:")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Identity,
    Attribute,
    Relationship,
    Preference,
    Temporal,
    Kv,
    Decision,
    State,
    Config,
    Location,
    #[serde(untagged)]
    Other(String),
}

impl FactType {
    pub fn as_str(&self) -> &str {
        match self {
            FactType::Identity => "identity",
            FactType::Attribute => "attribute",
            FactType::Relationship => "relationship",
            FactType::Preference => "preference",
            FactType::Temporal => "temporal",
            FactType::Kv => "kv",
            FactType::Decision => "decision",
            FactType::State => "state",
            FactType::Config => "config",
            FactType::Location => "location",
            FactType::Other(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub memory_id: i64,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub fact_type: FactType,
    pub confidence: f32,
    pub decay_rate: f32,
    pub source_quote: String,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
}

/// `effective_confidence(f, t) = f.confidence * exp(-f.decay_rate * days(t - f.last_reinforced_at))`.
///
/// Monotonically non-increasing in `t`; clamped to `[0, confidence]` by
/// construction since `decay_rate >= 0` and `days_since >= 0` are assumed.
pub fn effective_confidence(fact: &Fact, at: DateTime<Utc>) -> f32 {
    let days = (at - fact.last_reinforced_at).num_seconds().max(0) as f32 / 86_400.0;
    fact.confidence * (-fact.decay_rate * days).exp()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: i64,
    pub source_fact_id: i64,
    pub target_fact_id: i64,
    pub relation: String,
    /// `"inferred"` or an origin tag.
    pub source: String,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: i64,
    /// Unique provider name.
    pub provider: String,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: String,
    pub records_imported: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn content_hash_is_deterministic_and_order_sensitive() {
        let a = content_hash("hello", "file.md");
        let b = content_hash("hello", "file.md");
        assert_eq!(a, b);
        assert_ne!(a, content_hash("hello", "other.md"));
        // Concatenating without the NUL separator would collide here.
        assert_ne!(content_hash("ab", "c"), content_hash("a", "bc"));
    }

    #[test]
    fn effective_confidence_decays_monotonically() {
        let now = Utc::now();
        let fact = Fact {
            id: 1,
            memory_id: 1,
            subject: "s".into(),
            predicate: "p".into(),
            object: "o".into(),
            fact_type: FactType::Attribute,
            confidence: 0.9,
            decay_rate: 0.1,
            source_quote: String::new(),
            created_at: now,
            last_reinforced_at: now,
        };
        let c0 = effective_confidence(&fact, now);
        let c1 = effective_confidence(&fact, now + Duration::days(1));
        let c10 = effective_confidence(&fact, now + Duration::days(10));
        assert!(c0 > c1);
        assert!(c1 > c10);
        assert!((c0 - 0.9).abs() < 1e-6);
    }

    #[test]
    fn zero_decay_rate_never_decays() {
        let now = Utc::now();
        let fact = Fact {
            id: 1,
            memory_id: 1,
            subject: "s".into(),
            predicate: "p".into(),
            object: "o".into(),
            fact_type: FactType::Attribute,
            confidence: 0.5,
            decay_rate: 0.0,
            source_quote: String::new(),
            created_at: now,
            last_reinforced_at: now,
        };
        let later = effective_confidence(&fact, now + Duration::days(365));
        assert!((later - 0.5).abs() < 1e-6);
    }

    #[test]
    fn is_connector_sourced_matches_provider_prefix() {
        let mut m = Memory::new("hi", "discord:general");
        assert!(m.is_connector_sourced(&["discord", "telegram"]));
        m.source_file = "notes/today.md".to_string();
        assert!(!m.is_connector_sourced(&["discord", "telegram"]));
    }
}
