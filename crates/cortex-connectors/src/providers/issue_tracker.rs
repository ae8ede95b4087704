//! Issue tracker connector.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::{CortexError, Result};
use cortex_core::model::MemoryClass;
use regex::Regex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str_array};
use crate::rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const MAX_BODY_CHARS: usize = 2000;
const MAX_PAGES: u32 = 10;

pub struct IssueTrackerProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl IssueTrackerProvider {
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
            limiter: RateLimiter::new(Duration::from_millis(50)),
        }
    }
}

impl Default for IssueTrackerProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn repo_pattern() -> Regex {
    Regex::new(r"^[^/\s]+/[^/\s]+$").expect("static pattern compiles")
}

pub(crate) fn classify_by_labels(labels: &[String]) -> MemoryClass {
    let lower: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    if lower.iter().any(|l| l == "bug") {
        MemoryClass::Status
    } else if lower.iter().any(|l| l == "rfc" || l == "proposal" || l == "decision") {
        MemoryClass::Decision
    } else if lower.iter().any(|l| l == "policy" || l == "rule") {
        MemoryClass::Rule
    } else {
        MemoryClass::empty()
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_BODY_CHARS {
        let mut truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
        truncated.push('\u{2026}');
        truncated
    } else {
        body.to_string()
    }
}

#[async_trait]
impl Provider for IssueTrackerProvider {
    fn name(&self) -> &'static str {
        "issue-tracker"
    }

    fn display_name(&self) -> &'static str {
        "Issue Tracker"
    }

    fn default_config(&self) -> Value {
        json!({
            "token": "",
            "repos": [],
            "include_issues": true,
            "include_prs": true,
            "include_comments": false,
            "project": null,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        let token = cfg.get("token").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
        if token.is_none() {
            return Err(CortexError::InvalidConfig("token is required".into()));
        }
        let repos = require_str_array(cfg, "repos")?;
        let pattern = repo_pattern();
        for repo in repos {
            if !pattern.is_match(repo) {
                return Err(CortexError::InvalidConfig(format!("repos entry \"{repo}\" must look like \"owner/repo\"")));
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
        let token = cfg["token"].as_str().unwrap().to_string();
        let repos: Vec<String> = require_str_array(cfg, "repos")?.into_iter().map(str::to_string).collect();
        let include_issues = cfg.get("include_issues").and_then(|v| v.as_bool()).unwrap_or(true);
        let include_prs = cfg.get("include_prs").and_then(|v| v.as_bool()).unwrap_or(true);
        let include_comments = cfg.get("include_comments").and_then(|v| v.as_bool()).unwrap_or(false);
        let project = cfg.get("project").and_then(|v| v.as_str()).map(str::to_string);

        let mut records = Vec::new();

        for repo in repos {
            let items = self.list_issues(&token, &repo, since, cancel).await?;
            for item in items {
                if cancel.is_cancelled() {
                    return Err(CortexError::Cancelled);
                }
                let is_pr = item.get("pull_request").is_some();
                if is_pr && !include_prs {
                    continue;
                }
                if !is_pr && !include_issues {
                    continue;
                }
                let number = item.get("number").and_then(|v| v.as_i64()).unwrap_or(0);
                let Some(updated_raw) = item.get("updated_at").and_then(|v| v.as_str()) else { continue };
                let Ok(ts) = DateTime::parse_from_rfc3339(updated_raw) else { continue };
                let ts = ts.with_timezone(&Utc);
                let kind = if is_pr { "pr" } else { "issue" };
                let title = item.get("title").and_then(|v| v.as_str()).unwrap_or_default();
                let body = truncate_body(item.get("body").and_then(|v| v.as_str()).unwrap_or_default());
                let labels: Vec<String> = item
                    .get("labels")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|l| l.get("name").and_then(|n| n.as_str()).map(str::to_string)).collect())
                    .unwrap_or_default();

                let mut record = Record::new(
                    format!("github:{repo}#{number}"),
                    format!("{title}\n\n{body}"),
                    format!("{repo}/{kind}/{number}"),
                    ts,
                );
                record.memory_class = classify_by_labels(&labels);
                record.project = project.clone();
                records.push(record);

                if include_comments {
                    let comments = self.list_comments(&token, &repo, number, cancel).await?;
                    for comment in comments {
                        let Some(comment_id) = comment.get("id").and_then(|v| v.as_i64()) else { continue };
                        let Some(created_raw) = comment.get("created_at").and_then(|v| v.as_str()) else { continue };
                        let Ok(comment_ts) = DateTime::parse_from_rfc3339(created_raw) else { continue };
                        let comment_ts = comment_ts.with_timezone(&Utc);
                        if let Some(since) = since {
                            if comment_ts <= since {
                                continue;
                            }
                        }
                        let comment_body = truncate_body(comment.get("body").and_then(|v| v.as_str()).unwrap_or_default());
                        let mut comment_record = Record::new(
                            format!("github:{repo}#{number}-comment-{comment_id}"),
                            comment_body,
                            format!("{repo}/{kind}/{number}"),
                            comment_ts,
                        );
                        comment_record.section = Some(format!("comment-{comment_id}"));
                        comment_record.project = project.clone();
                        records.push(comment_record);
                    }
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl IssueTrackerProvider {
    async fn list_issues(&self, token: &str, repo: &str, since: Option<DateTime<Utc>>, cancel: &CancellationToken) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let mut url = format!("{}/repos/{repo}/issues?state=all&per_page=100&page={page}", self.base_url);
            if let Some(since) = since {
                url.push_str(&format!("&since={}", since.to_rfc3339()));
            }
            let page_items = self.get_array(token, &url).await?;
            if page_items.is_empty() {
                break;
            }
            let count = page_items.len();
            out.extend(page_items);
            if count < 100 {
                break;
            }
        }
        Ok(out)
    }

    async fn list_comments(&self, token: &str, repo: &str, number: i64, cancel: &CancellationToken) -> Result<Vec<Value>> {
        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }
        let url = format!("{}/repos/{repo}/issues/{number}/comments?per_page=100", self.base_url);
        self.get_array(token, &url).await
    }

    async fn get_array(&self, token: &str, url: &str) -> Result<Vec<Value>> {
        self.limiter.wait().await;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("User-Agent", "cortex")
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CortexError::Auth(format!("issue tracker rejected credentials ({status})")));
        }
        let body: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once_json(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn fetch_imports_a_labeled_issue_and_classifies_it() {
        let body = r#"[{"number":7,"updated_at":"2024-01-01T00:00:00Z","title":"Bug title","body":"Bug body","labels":[{"name":"bug"}]}]"#;
        let base_url = serve_once_json(body).await;
        let provider = IssueTrackerProvider::with_base_url(base_url);
        let cfg = json!({
            "token": "t",
            "repos": ["owner/repo"],
            "include_comments": false,
        });
        let cancel = CancellationToken::new();

        let records = provider.fetch(&cfg, None, &cancel).await.unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].content.starts_with("Bug title"));
        assert_eq!(records[0].memory_class, MemoryClass::Status);
        assert_eq!(records[0].source, "owner/repo/issue/7");
    }

    #[test]
    fn classify_by_labels_maps_bug_and_decision_and_rule() {
        assert_eq!(classify_by_labels(&["bug".to_string()]), MemoryClass::Status);
        assert_eq!(classify_by_labels(&["RFC".to_string()]), MemoryClass::Decision);
        assert_eq!(classify_by_labels(&["policy".to_string()]), MemoryClass::Rule);
        assert_eq!(classify_by_labels(&["enhancement".to_string()]), MemoryClass::empty());
    }

    #[test]
    fn truncate_body_caps_at_2000_chars() {
        let long = "a".repeat(2500);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), 2001);
    }

    #[test]
    fn validate_config_requires_owner_slash_repo_shape() {
        let provider = IssueTrackerProvider::new();
        let bad = json!({ "token": "t", "repos": ["notvalid"] });
        assert!(provider.validate_config(&bad).is_err());
        let good = json!({ "token": "t", "repos": ["owner/repo"] });
        assert!(provider.validate_config(&good).is_ok());
    }
}
