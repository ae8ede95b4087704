//! Mail connector, bridged through an external CLI binary.
//!
//! The binary is expected to print a JSON array of messages to stdout
//! given `--account`, `--query`, and `--limit` arguments. This keeps
//! provider auth out of this process entirely — the bridge binary owns
//! OAuth/token storage.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::{CortexError, Result};
use serde_json::{Value, json};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str};

const DEFAULT_BINARY: &str = "gog";
const DEFAULT_MAX_RESULTS: u64 = 100;
const MAX_RESULTS_CAP: u64 = 500;

pub struct MailProvider;

impl MailProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MailProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks a MIME part tree depth-first, returning the first `text/plain`
/// body found. Nested `multipart/*` parts recurse into their `parts`.
pub(crate) fn mime_walk_text_plain(part: &Value) -> Option<String> {
    let mime_type = part.get("mimeType").and_then(|v| v.as_str()).unwrap_or_default();
    if mime_type == "text/plain" {
        return part.get("body").and_then(|b| b.as_str()).map(str::to_string);
    }
    if mime_type.starts_with("multipart/") {
        if let Some(parts) = part.get("parts").and_then(|v| v.as_array()) {
            for nested in parts {
                if let Some(found) = mime_walk_text_plain(nested) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// `CATEGORY_PERSONAL` → `Personal`; a bare system label (`INBOX`,
/// `UNREAD`, …) is dropped entirely.
pub(crate) fn pretty_print_label(label: &str) -> Option<String> {
    if let Some(rest) = label.strip_prefix("CATEGORY_") {
        let mut chars = rest.chars();
        return match chars.next() {
            Some(first) => Some(format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase())),
            None => None,
        };
    }
    const SYSTEM_LABELS: &[&str] = &["INBOX", "UNREAD", "SENT", "DRAFT", "TRASH", "SPAM", "STARRED", "IMPORTANT"];
    if SYSTEM_LABELS.contains(&label) {
        return None;
    }
    Some(label.to_string())
}

#[async_trait]
impl Provider for MailProvider {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn display_name(&self) -> &'static str {
        "Mail"
    }

    fn default_config(&self) -> Value {
        json!({
            "account": "user@example.com",
            "query": "",
            "max_results": DEFAULT_MAX_RESULTS,
            "include_bodies": true,
            "skip_categories": [],
            "project": null,
            "gog_path": DEFAULT_BINARY,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        let account = require_str(cfg, "account")?;
        if !account.contains('@') {
            return Err(CortexError::InvalidConfig("account must contain '@'".into()));
        }
        if let Some(max) = cfg.get("max_results").and_then(|v| v.as_u64()) {
            if max > MAX_RESULTS_CAP {
                return Err(CortexError::InvalidConfig(format!("max_results must be <= {MAX_RESULTS_CAP}")));
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
        let account = require_str(cfg, "account")?.to_string();
        let query = cfg.get("query").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let limit = cfg.get("max_results").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_MAX_RESULTS);
        let include_bodies = cfg.get("include_bodies").and_then(|v| v.as_bool()).unwrap_or(true);
        let skip_categories: Vec<String> = cfg
            .get("skip_categories")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let project = cfg.get("project").and_then(|v| v.as_str()).map(str::to_string);
        let binary = cfg.get("gog_path").and_then(|v| v.as_str()).unwrap_or(DEFAULT_BINARY).to_string();

        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }

        let mut command = Command::new(&binary);
        command
            .arg("--account")
            .arg(&account)
            .arg("--query")
            .arg(&query)
            .arg("--limit")
            .arg(limit.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if include_bodies {
            command.arg("--include-bodies");
        }

        let output = command
            .output()
            .await
            .map_err(|e| CortexError::TransientNetwork(format!("failed to run {binary}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CortexError::TransientNetwork(format!("{binary} exited with {}: {stderr}", output.status)));
        }

        let messages: Vec<Value> = serde_json::from_slice(&output.stdout)
            .map_err(|e| CortexError::Parse(format!("mail bridge output not JSON: {e}")))?;

        let mut records = Vec::new();
        for msg in messages {
            let Some(id) = msg.get("id").and_then(|v| v.as_str()) else { continue };
            let Some(date_raw) = msg.get("date").and_then(|v| v.as_str()) else { continue };
            let Ok(ts) = DateTime::parse_from_rfc3339(date_raw) else { continue };
            let ts = ts.with_timezone(&Utc);
            if let Some(since) = since {
                if ts <= since {
                    continue;
                }
            }

            let labels: Vec<&str> = msg.get("labels").and_then(|v| v.as_array()).map(|arr| arr.iter().filter_map(|v| v.as_str()).collect()).unwrap_or_default();
            if labels.iter().any(|l| skip_categories.iter().any(|s| s == l)) {
                continue;
            }
            let pretty_labels: Vec<String> = labels.iter().filter_map(|l| pretty_print_label(l)).collect();

            let subject = msg.get("subject").and_then(|v| v.as_str()).unwrap_or("(no subject)");
            let body = if include_bodies {
                msg.get("payload")
                    .and_then(mime_walk_text_plain)
                    .or_else(|| msg.get("snippet").and_then(|v| v.as_str()).map(str::to_string))
                    .unwrap_or_default()
            } else {
                msg.get("snippet").and_then(|v| v.as_str()).unwrap_or_default().to_string()
            };

            let mut content = format!("Subject: {subject}\n");
            if !pretty_labels.is_empty() {
                content.push_str(&format!("Labels: {}\n", pretty_labels.join(", ")));
            }
            content.push('\n');
            content.push_str(&body);

            let mut record = Record::new(id.to_string(), content, format!("{account}/{id}"), ts);
            record.project = project.clone();
            records.push(record);
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_walk_finds_nested_text_plain() {
        let part = json!({
            "mimeType": "multipart/alternative",
            "parts": [
                { "mimeType": "text/html", "body": "<p>hi</p>" },
                { "mimeType": "text/plain", "body": "hi plain" },
            ],
        });
        assert_eq!(mime_walk_text_plain(&part), Some("hi plain".to_string()));
    }

    #[test]
    fn mime_walk_returns_none_without_text_plain() {
        let part = json!({ "mimeType": "text/html", "body": "<p>hi</p>" });
        assert_eq!(mime_walk_text_plain(&part), None);
    }

    #[test]
    fn pretty_print_label_formats_category_and_drops_system() {
        assert_eq!(pretty_print_label("CATEGORY_PERSONAL"), Some("Personal".to_string()));
        assert_eq!(pretty_print_label("INBOX"), None);
        assert_eq!(pretty_print_label("Work"), Some("Work".to_string()));
    }

    #[test]
    fn validate_config_requires_at_sign_in_account() {
        let provider = MailProvider::new();
        assert!(provider.validate_config(&json!({ "account": "noatsign" })).is_err());
        assert!(provider.validate_config(&json!({ "account": "a@b.com" })).is_ok());
    }

    #[test]
    fn validate_config_rejects_max_results_over_cap() {
        let provider = MailProvider::new();
        let bad = json!({ "account": "a@b.com", "max_results": 501 });
        assert!(provider.validate_config(&bad).is_err());
    }
}
