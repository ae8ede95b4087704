//! LLM-backed query expansion. A `RecursiveReasoner` may be configured
//! with a `QueryExpander` so its `SEARCH` action fans out across a few
//! alternate phrasings of the argument instead of querying it verbatim.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_core::collab::{ChatMessage, LlmClient};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::warn;

const CACHE_CAPACITY: usize = 100;
const CACHE_TTL: Duration = Duration::from_secs(3600);
const EXPANSION_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_EXPANSIONS: usize = 5;

pub struct QueryExpander {
    llm: Arc<dyn LlmClient>,
    cache: Mutex<LruCache<String, (Vec<String>, Instant)>>,
}

impl QueryExpander {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
        }
    }

    /// Returns 3-5 alternate queries, falling back to `[query]` on any
    /// error or timeout.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let key = query.to_lowercase();

        {
            let mut cache = self.cache.lock().await;
            if let Some((cached, stored_at)) = cache.get(&key) {
                if stored_at.elapsed() < CACHE_TTL {
                    return cached.clone();
                }
            }
        }

        let fallback = vec![query.to_string()];
        let prompt = format!(
            "Generate 3 to 5 precise alternate search queries for the following query. \
             Respond with a JSON array of strings only.\n\nQuery: {query}"
        );
        let messages = [ChatMessage::system("You rewrite search queries."), ChatMessage::user(prompt)];

        let result = tokio::time::timeout(EXPANSION_TIMEOUT, self.llm.chat(&messages, 256)).await;
        let expansions = match result {
            Ok(Ok(completion)) => parse_expansions(&completion.content, query),
            Ok(Err(err)) => {
                warn!(error = %err, "query expansion call failed, falling back to original query");
                fallback
            }
            Err(_) => {
                warn!("query expansion timed out, falling back to original query");
                fallback
            }
        };

        let mut cache = self.cache.lock().await;
        cache.put(key, (expansions.clone(), Instant::now()));
        expansions
    }
}

/// Parses a JSON array from the model's response, tolerating markdown
/// code fences and object wrappers keyed `queries`/`expansions`/`results`/
/// `search_queries`. Falls back to `[original]` if nothing parses.
fn parse_expansions(raw: &str, original: &str) -> Vec<String> {
    let stripped = strip_code_fence(raw.trim());
    let value: serde_json::Value = match serde_json::from_str(stripped) {
        Ok(v) => v,
        Err(_) => return vec![original.to_string()],
    };

    let array = if let Some(arr) = value.as_array() {
        arr.clone()
    } else if let Some(obj) = value.as_object() {
        ["queries", "expansions", "results", "search_queries"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(|v| v.as_array()).cloned())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    if array.is_empty() {
        return vec![original.to_string()];
    }

    let mut seen = std::collections::HashSet::new();
    let mut expansions = Vec::new();
    for item in array {
        let Some(s) = item.as_str() else { continue };
        let lower = s.to_lowercase();
        if seen.insert(lower) {
            expansions.push(s.to_string());
        }
        if expansions.len() >= MAX_EXPANSIONS {
            break;
        }
    }

    if expansions.is_empty() { vec![original.to_string()] } else { expansions }
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else { return raw };
    let rest = rest.strip_prefix("json").unwrap_or(rest).trim_start();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::collab::ChatCompletion;
    use cortex_core::error::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubLlm {
        calls: AtomicUsize,
        response: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn chat(&self, _messages: &[ChatMessage], _max_tokens: u32) -> Result<ChatCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatCompletion {
                content: self.response.clone(),
                model: "stub".into(),
                provider: "stub".into(),
                prompt_tokens: 10,
                completion_tokens: 10,
                requested_at: chrono::Utc::now(),
                duration: Duration::from_millis(1),
            })
        }
    }

    #[tokio::test]
    async fn expand_caches_identical_queries_without_a_second_call() {
        let llm = Arc::new(StubLlm { calls: AtomicUsize::new(0), response: r#"["alt one", "alt two"]"#.to_string() });
        let expander = QueryExpander::new(llm.clone());

        let first = expander.expand("deploy process").await;
        let second = expander.expand("Deploy Process").await;
        assert_eq!(first, second);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_expansions_reads_plain_array() {
        let raw = r#"["a", "b", "A"]"#;
        assert_eq!(parse_expansions(raw, "orig"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn parse_expansions_unwraps_object_with_known_key() {
        let raw = r#"{"queries": ["x", "y"]}"#;
        assert_eq!(parse_expansions(raw, "orig"), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn parse_expansions_strips_markdown_code_fence() {
        let raw = "```json\n[\"a\", \"b\"]\n```";
        assert_eq!(parse_expansions(raw, "orig"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn parse_expansions_falls_back_on_garbage() {
        assert_eq!(parse_expansions("not json", "orig"), vec!["orig".to_string()]);
    }

    #[test]
    fn parse_expansions_caps_at_five() {
        let raw = r#"["a","b","c","d","e","f"]"#;
        assert_eq!(parse_expansions(raw, "orig").len(), 5);
    }
}
