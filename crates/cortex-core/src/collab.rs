//! Collaborator traits: the extractor, embedding provider, and LLM client
//! are treated as external, pure-function-shaped dependencies. The core
//! only depends on these narrow contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::model::FactType;

/// One fact as returned by the extractor, before the sync engine assigns
/// `id`/`memory_id` and inserts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub fact_type: FactType,
    pub confidence: f32,
    pub decay_rate: f32,
    pub source_quote: String,
}

/// `Extract(ctx, text, metadata) -> [ExtractedFact]`, consumed as a pure
/// function by the sync engine.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Vec<ExtractedFact>>;
}

/// `(texts) -> [vector]`, consumed by the sync engine (to embed new
/// memories) and the search engine (to embed queries).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(skip, default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// `Chat(messages, max_tokens) -> {content, model, provider, prompt_tokens,
/// completion_tokens, duration}`. Implementations strip `<think>...</think>`
/// blocks before returning content.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<ChatCompletion>;

    /// Temperature used for sampling; the core defaults every call site to
    /// 0.3 unless a caller overrides it.
    fn default_temperature(&self) -> f32 {
        0.3
    }
}

/// Strip `<think>...</think>` blocks defensively before consuming content.
/// Case-insensitive, handles multiple blocks, tolerates an unterminated
/// trailing block by dropping everything after the open tag.
pub fn strip_think_blocks(content: &str) -> String {
    let lower = content.to_lowercase();
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0usize;
    loop {
        let Some(start_rel) = lower[cursor..].find("<think>") else {
            out.push_str(&content[cursor..]);
            break;
        };
        let start = cursor + start_rel;
        out.push_str(&content[cursor..start]);
        match lower[start..].find("</think>") {
            Some(end_rel) => {
                cursor = start + end_rel + "</think>".len();
            }
            None => {
                cursor = content.len();
                break;
            }
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_think_block() {
        let s = "<think>reasoning here</think>final answer";
        assert_eq!(strip_think_blocks(s), "final answer");
    }

    #[test]
    fn strips_multiple_think_blocks_case_insensitively() {
        let s = "<THINK>a</THINK>keep this<think>b</think> and this";
        assert_eq!(strip_think_blocks(s), "keep this and this");
    }

    #[test]
    fn passes_through_content_without_think_blocks() {
        assert_eq!(strip_think_blocks("plain text"), "plain text");
    }

    #[test]
    fn drops_unterminated_trailing_think_block() {
        let s = "answer<think>never closed";
        assert_eq!(strip_think_blocks(s), "answer");
    }
}
