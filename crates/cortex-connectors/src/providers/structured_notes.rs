//! Structured notes service connector.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::{CortexError, Result};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str};
use crate::rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
const DEFAULT_MAX_PAGES: u64 = 500;
const MAX_PAGES_CAP: u64 = 2000;

pub struct StructuredNotesProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl StructuredNotesProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            limiter: RateLimiter::new(Duration::from_millis(350)),
        }
    }
}

impl Default for StructuredNotesProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders one content block to a markdown line. Unsupported block types
/// render to an empty string and are filtered out by the caller.
pub(crate) fn block_to_markdown(block: &Value) -> String {
    let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or_default();
    let Some(payload) = block.get(block_type) else { return String::new() };
    let text = rich_text_to_plain(payload.get("rich_text"));

    match block_type {
        "heading_1" => format!("# {text}"),
        "heading_2" => format!("## {text}"),
        "heading_3" => format!("### {text}"),
        "paragraph" => text,
        "bulleted_list_item" => format!("- {text}"),
        "numbered_list_item" => format!("1. {text}"),
        "to_do" => {
            let checked = payload.get("checked").and_then(|v| v.as_bool()).unwrap_or(false);
            format!("- [{}] {text}", if checked { "x" } else { " " })
        }
        "quote" => format!("> {text}"),
        "code" => format!("```\n{text}\n```"),
        _ => String::new(),
    }
}

fn rich_text_to_plain(rich_text: Option<&Value>) -> String {
    rich_text
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|segment| segment.get("plain_text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Builds the `property: value` markdown list emitted for a database row.
pub(crate) fn properties_to_markdown(properties: &Value) -> String {
    let Some(map) = properties.as_object() else { return String::new() };
    let mut lines = Vec::new();
    for (key, prop) in map {
        let prop_type = prop.get("type").and_then(|v| v.as_str()).unwrap_or_default();
        let value = match prop_type {
            "title" => rich_text_to_plain(prop.get("title")),
            "rich_text" => rich_text_to_plain(prop.get("rich_text")),
            "select" => prop.get("select").and_then(|s| s.get("name")).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            "multi_select" => prop
                .get("multi_select")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|s| s.get("name").and_then(|v| v.as_str())).collect::<Vec<_>>().join(", "))
                .unwrap_or_default(),
            "checkbox" => prop.get("checkbox").and_then(|v| v.as_bool()).map(|b| b.to_string()).unwrap_or_default(),
            "number" => prop.get("number").and_then(|v| v.as_f64()).map(|n| n.to_string()).unwrap_or_default(),
            "date" => prop.get("date").and_then(|d| d.get("start")).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            _ => String::new(),
        };
        if !value.is_empty() {
            lines.push(format!("- **{key}**: {value}"));
        }
    }
    lines.sort();
    lines.join("\n")
}

#[async_trait]
impl Provider for StructuredNotesProvider {
    fn name(&self) -> &'static str {
        "structured-notes"
    }

    fn display_name(&self) -> &'static str {
        "Structured Notes"
    }

    fn default_config(&self) -> Value {
        json!({
            "token": "",
            "root_page_ids": [],
            "include_databases": true,
            "max_pages": DEFAULT_MAX_PAGES,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        let token = require_str(cfg, "token")?;
        if !(token.starts_with("ntn_") || token.starts_with("secret_")) {
            return Err(CortexError::InvalidConfig("token must start with \"ntn_\" or \"secret_\"".into()));
        }
        if let Some(max) = cfg.get("max_pages").and_then(|v| v.as_u64()) {
            if max > MAX_PAGES_CAP {
                return Err(CortexError::InvalidConfig(format!("max_pages must be <= {MAX_PAGES_CAP}")));
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        cfg: &Value,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        self.validate_config(cfg)?;
        let token = require_str(cfg, "token")?.to_string();
        let include_databases = cfg.get("include_databases").and_then(|v| v.as_bool()).unwrap_or(true);
        let max_pages = cfg.get("max_pages").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_MAX_PAGES).min(MAX_PAGES_CAP);

        let results = self.search(&token, max_pages, cancel).await?;
        let mut records = Vec::new();

        for item in results {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let object_type = item.get("object").and_then(|v| v.as_str()).unwrap_or_default();
            let Some(id) = item.get("id").and_then(|v| v.as_str()) else { continue };
            let Some(edited_raw) = item.get("last_edited_time").and_then(|v| v.as_str()) else { continue };
            let Ok(ts) = DateTime::parse_from_rfc3339(edited_raw) else { continue };
            let ts = ts.with_timezone(&Utc);
            if let Some(since) = since {
                if ts <= since {
                    continue;
                }
            }

            if object_type == "database" {
                if !include_databases {
                    continue;
                }
                for row in self.query_database(&token, id, cancel).await? {
                    let Some(row_id) = row.get("id").and_then(|v| v.as_str()) else { continue };
                    let markdown = properties_to_markdown(row.get("properties").unwrap_or(&Value::Null));
                    records.push(Record::new(row_id.to_string(), markdown, format!("notion/database/{id}/row/{row_id}"), ts));
                }
                continue;
            }

            let blocks = self.block_children(&token, id, cancel).await?;
            let markdown = blocks
                .iter()
                .map(block_to_markdown)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");
            if markdown.is_empty() {
                continue;
            }
            records.push(Record::new(id.to_string(), markdown, format!("notion/page/{id}"), ts));
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl StructuredNotesProvider {
    async fn search(&self, token: &str, max_pages: u64, cancel: &CancellationToken) -> Result<Vec<Value>> {
        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }
        self.limiter.wait().await;
        let body = json!({
            "sort": { "direction": "descending", "timestamp": "last_edited_time" },
            "page_size": max_pages.min(100),
        });
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(token)
            .header("Notion-Version", "2022-06-28")
            .json(&body)
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CortexError::Auth(format!("structured notes rejected credentials ({status})")));
        }
        let parsed: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
        Ok(parsed.get("results").and_then(|v| v.as_array()).cloned().unwrap_or_default())
    }

    async fn block_children(&self, token: &str, page_id: &str, cancel: &CancellationToken) -> Result<Vec<Value>> {
        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }
        self.limiter.wait().await;
        let url = format!("{}/blocks/{page_id}/children?page_size=100", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Notion-Version", "2022-06-28")
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
        let body: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
        Ok(body.get("results").and_then(|v| v.as_array()).cloned().unwrap_or_default())
    }

    async fn query_database(&self, token: &str, database_id: &str, cancel: &CancellationToken) -> Result<Vec<Value>> {
        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }
        self.limiter.wait().await;
        let url = format!("{}/databases/{database_id}/query", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Notion-Version", "2022-06-28")
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
        let body: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
        Ok(body.get("results").and_then(|v| v.as_array()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_to_markdown_renders_headings_and_lists() {
        let heading = json!({ "type": "heading_1", "heading_1": { "rich_text": [{ "plain_text": "Title" }] } });
        assert_eq!(block_to_markdown(&heading), "# Title");

        let todo = json!({ "type": "to_do", "to_do": { "rich_text": [{ "plain_text": "ship it" }], "checked": true } });
        assert_eq!(block_to_markdown(&todo), "- [x] ship it");
    }

    #[test]
    fn block_to_markdown_ignores_unsupported_type() {
        let block = json!({ "type": "divider", "divider": {} });
        assert_eq!(block_to_markdown(&block), "");
    }

    #[test]
    fn properties_to_markdown_renders_sorted_known_types() {
        let props = json!({
            "Name": { "type": "title", "title": [{ "plain_text": "Task A" }] },
            "Done": { "type": "checkbox", "checkbox": true },
        });
        let markdown = properties_to_markdown(&props);
        assert!(markdown.contains("**Done**: true"));
        assert!(markdown.contains("**Name**: Task A"));
    }

    #[test]
    fn validate_config_accepts_either_token_prefix() {
        let provider = StructuredNotesProvider::new();
        assert!(provider.validate_config(&json!({ "token": "ntn_abc" })).is_ok());
        assert!(provider.validate_config(&json!({ "token": "secret_abc" })).is_ok());
        assert!(provider.validate_config(&json!({ "token": "bad" })).is_err());
    }

    #[test]
    fn validate_config_rejects_max_pages_over_cap() {
        let provider = StructuredNotesProvider::new();
        let bad = json!({ "token": "ntn_abc", "max_pages": 3000 });
        assert!(provider.validate_config(&bad).is_err());
    }
}
