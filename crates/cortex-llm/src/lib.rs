//! LLM transports consumed via [`cortex_core::LlmClient`].
//!
//! Two transports are supported: a local `ollama` provider and a cloud
//! `openrouter` provider. Both take their base URL as a constructor-time
//! field rather than a global, so tests can point them at a mock server.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cortex_core::collab::{ChatCompletion, ChatMessage, ChatRole, LlmClient, strip_think_blocks};
use cortex_core::error::{CortexError, Result};
use serde_json::json;
use tracing::{debug, warn};

const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn messages_json(messages: &[ChatMessage]) -> serde_json::Value {
    json!(
        messages
            .iter()
            .map(|m| json!({ "role": role_str(m.role), "content": m.content }))
            .collect::<Vec<_>>()
    )
}

/// Local Ollama chat transport. Base URL resolves from `OLLAMA_BASE_URL`
/// when constructed via [`OllamaClient::from_env`], falling back to
/// `http://localhost:11434`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_BASE_URL.to_string());
        Self::new(base_url, model)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<ChatCompletion> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": messages_json(messages),
            "stream": false,
            "options": { "num_predict": max_tokens, "temperature": self.default_temperature() },
        });

        let started = Instant::now();
        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CortexError::Parse(format!("ollama response not JSON: {e}")))?;

        if !status.is_success() {
            return Err(CortexError::TransientNetwork(format!(
                "ollama error ({status}): {body}"
            )));
        }

        let raw_content = body
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| CortexError::Parse(format!("ollama response missing content: {body}")))?;

        let prompt_tokens = body.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let completion_tokens = body.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        debug!(model = %self.model, prompt_tokens, completion_tokens, "ollama chat completed");

        Ok(ChatCompletion {
            content: strip_think_blocks(raw_content),
            model: self.model.clone(),
            provider: "ollama".to_string(),
            prompt_tokens,
            completion_tokens,
            requested_at: chrono::Utc::now(),
            duration: started.elapsed(),
        })
    }
}

/// OpenRouter cloud chat transport. Requires a bearer API key.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| CortexError::Auth("OPENROUTER_API_KEY is not set".to_string()))?;
        Ok(Self::new(OPENROUTER_BASE_URL, api_key, model))
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<ChatCompletion> {
        if self.api_key.trim().is_empty() {
            return Err(CortexError::Auth("openrouter api key is empty".to_string()));
        }

        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": messages_json(messages),
            "max_tokens": max_tokens,
            "temperature": self.default_temperature(),
        });

        let started = Instant::now();
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CortexError::Auth(format!("openrouter rejected credentials ({status})")));
        }
        if status.as_u16() == 429 {
            return Err(CortexError::RateLimited("openrouter returned 429".to_string()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CortexError::Parse(format!("openrouter response not JSON: {e}")))?;

        if !status.is_success() {
            return Err(CortexError::TransientNetwork(format!(
                "openrouter error ({status}): {body}"
            )));
        }

        let raw_content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CortexError::Parse(format!("openrouter response missing content: {body}")))?;

        let prompt_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;

        if prompt_tokens == 0 && completion_tokens == 0 {
            warn!("openrouter response carried no usage data");
        }

        Ok(ChatCompletion {
            content: strip_think_blocks(raw_content),
            model: self.model.clone(),
            provider: "openrouter".to_string(),
            prompt_tokens,
            completion_tokens,
            requested_at: chrono::Utc::now(),
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_mapping_is_stable() {
        assert_eq!(role_str(ChatRole::System), "system");
        assert_eq!(role_str(ChatRole::User), "user");
        assert_eq!(role_str(ChatRole::Assistant), "assistant");
    }

    #[test]
    fn ollama_client_defaults_to_localhost() {
        let client = OllamaClient::new(DEFAULT_OLLAMA_BASE_URL, "llama3.1:8b");
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn openrouter_rejects_empty_api_key() {
        let client = OpenRouterClient::new(OPENROUTER_BASE_URL, "", "openai/gpt-4o-mini");
        let err = client
            .chat(&[ChatMessage::user("hi")], 64)
            .await
            .unwrap_err();
        assert!(matches!(err, CortexError::Auth(_)));
    }
}
