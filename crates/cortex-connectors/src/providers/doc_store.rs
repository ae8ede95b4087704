//! Document store connector.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::{CortexError, Result};
use cortex_core::model::MemoryClass;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str};
use crate::rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_EXPORT_BASE_URL: &str = "https://www.googleapis.com/drive/v3/files";
const MAX_PAGES: u32 = 10;
const DEFAULT_MAX_CONTENT_KB: u64 = 100;

const EXPORTABLE_MIME_TYPES: &[&str] = &[
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.spreadsheet",
    "application/vnd.google-apps.presentation",
];

pub struct DocStoreProvider {
    client: reqwest::Client,
    base_url: String,
    export_base_url: String,
    limiter: RateLimiter,
}

impl DocStoreProvider {
    pub fn new() -> Self {
        Self::with_base_urls(DEFAULT_BASE_URL, DEFAULT_EXPORT_BASE_URL)
    }

    pub fn with_base_urls(base_url: impl Into<String>, export_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            export_base_url: export_base_url.into(),
            limiter: RateLimiter::new(Duration::from_millis(50)),
        }
    }
}

impl Default for DocStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn classify_by_filename(name: &str) -> MemoryClass {
    let lower = name.to_lowercase();
    if lower.contains("decision") || lower.contains("rfc") || lower.contains("proposal") {
        MemoryClass::Decision
    } else if lower.contains("policy") || lower.contains("rule") || lower.contains("guideline") {
        MemoryClass::Rule
    } else if lower.contains("status") || lower.contains("update") {
        MemoryClass::Status
    } else {
        MemoryClass::empty()
    }
}

#[async_trait]
impl Provider for DocStoreProvider {
    fn name(&self) -> &'static str {
        "doc-store"
    }

    fn display_name(&self) -> &'static str {
        "Document Store"
    }

    fn default_config(&self) -> Value {
        json!({
            "access_token": "",
            "folder_ids": [],
            "include_shared": false,
            "include_content": true,
            "max_content_kb": DEFAULT_MAX_CONTENT_KB,
            "project": null,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        require_str(cfg, "access_token")?;
        Ok(())
    }

    async fn fetch(
        &self,
        cfg: &Value,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        self.validate_config(cfg)?;
        let token = require_str(cfg, "access_token")?.to_string();
        let folder_ids: Vec<String> = cfg
            .get("folder_ids")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let include_shared = cfg.get("include_shared").and_then(|v| v.as_bool()).unwrap_or(false);
        let include_content = cfg.get("include_content").and_then(|v| v.as_bool()).unwrap_or(true);
        let max_content_bytes = cfg.get("max_content_kb").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_MAX_CONTENT_KB) * 1024;
        let project = cfg.get("project").and_then(|v| v.as_str()).map(str::to_string);

        let files = self.list_files(&token, &folder_ids, include_shared, cancel).await?;

        let mut records = Vec::new();
        for file in files {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let Some(id) = file.get("id").and_then(|v| v.as_str()) else { continue };
            let name = file.get("name").and_then(|v| v.as_str()).unwrap_or("untitled");
            let mime_type = file.get("mimeType").and_then(|v| v.as_str()).unwrap_or_default();
            let Some(modified_raw) = file.get("modifiedTime").and_then(|v| v.as_str()) else { continue };
            let Ok(ts) = DateTime::parse_from_rfc3339(modified_raw) else { continue };
            let ts = ts.with_timezone(&Utc);
            if let Some(since) = since {
                if ts <= since {
                    continue;
                }
            }

            let mut content = name.to_string();
            if include_content && EXPORTABLE_MIME_TYPES.contains(&mime_type) {
                if let Ok(exported) = self.export_text(&token, id).await {
                    let truncated: String = exported.chars().take(max_content_bytes as usize).collect();
                    content = format!("{name}\n\n{truncated}");
                }
            }

            let mut record = Record::new(id.to_string(), content, format!("drive/{name}"), ts);
            record.memory_class = classify_by_filename(name);
            record.project = project.clone();
            records.push(record);
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl DocStoreProvider {
    async fn list_files(&self, token: &str, folder_ids: &[String], include_shared: bool, cancel: &CancellationToken) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        let query = if folder_ids.is_empty() {
            "trashed = false".to_string()
        } else {
            let clauses: Vec<String> = folder_ids.iter().map(|id| format!("'{id}' in parents")).collect();
            format!("trashed = false and ({})", clauses.join(" or "))
        };

        for _ in 0..MAX_PAGES {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            self.limiter.wait().await;
            let mut url = format!(
                "{}/files?q={}&fields=nextPageToken,files(id,name,mimeType,modifiedTime,shared)",
                self.base_url,
                urlencoding::encode(&query),
            );
            if include_shared {
                url.push_str("&includeItemsFromAllDrives=true&supportsAllDrives=true");
            }
            if let Some(pt) = &page_token {
                url.push_str(&format!("&pageToken={pt}"));
            }
            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(CortexError::Auth(format!("doc store rejected credentials ({status})")));
            }
            let body: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
            out.extend(body.get("files").and_then(|v| v.as_array()).cloned().unwrap_or_default());
            page_token = body.get("nextPageToken").and_then(|v| v.as_str()).map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn export_text(&self, token: &str, file_id: &str) -> Result<String> {
        self.limiter.wait().await;
        let url = format!("{}/{file_id}/export?mimeType=text/plain", self.export_base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
        response.text().await.map_err(|e| CortexError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_filename_matches_known_tokens() {
        assert_eq!(classify_by_filename("Q3 Decision Doc"), MemoryClass::Decision);
        assert_eq!(classify_by_filename("Security Policy"), MemoryClass::Rule);
        assert_eq!(classify_by_filename("Weekly Status Update"), MemoryClass::Status);
        assert_eq!(classify_by_filename("Random Notes"), MemoryClass::empty());
    }
}
