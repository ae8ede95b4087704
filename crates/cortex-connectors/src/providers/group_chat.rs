//! Channel-oriented group chat connector, cursor paginated.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cortex_core::error::{CortexError, Result};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str, require_str_array};
use crate::rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";
const MAX_HISTORY_PAGES: u32 = 10;
const MAX_THREAD_PAGES: u32 = 5;

pub struct GroupChatProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl GroupChatProvider {
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

impl Default for GroupChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Every Slack-style event carries a `type`; only plain messages and
/// explicit file-share / thread-broadcast subtypes are kept.
pub(crate) fn is_keepable_subtype(subtype: Option<&str>) -> bool {
    matches!(subtype, None | Some("file_share") | Some("thread_broadcast"))
}

fn parse_slack_ts(raw: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = raw.parse().ok()?;
    Utc.timestamp_opt(secs as i64, ((secs.fract()) * 1e9) as u32).single()
}

#[async_trait]
impl Provider for GroupChatProvider {
    fn name(&self) -> &'static str {
        "channel-group-chat"
    }

    fn display_name(&self) -> &'static str {
        "Group Chat"
    }

    fn default_config(&self) -> Value {
        json!({
            "token": "xoxb-...",
            "channels": [],
            "days_back": 30,
            "include_threads": true,
            "project": null,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        let token = require_str(cfg, "token")?;
        if !(token.starts_with("xoxb-") || token.starts_with("xoxp-")) {
            return Err(CortexError::InvalidConfig("token must start with \"xoxb-\" or \"xoxp-\"".into()));
        }
        require_str_array(cfg, "channels")?;
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
        let channels: Vec<String> = require_str_array(cfg, "channels")?.into_iter().map(str::to_string).collect();
        let include_threads = cfg.get("include_threads").and_then(|v| v.as_bool()).unwrap_or(true);
        let project = cfg.get("project").and_then(|v| v.as_str()).map(str::to_string);
        let oldest = since.map(|s| s.timestamp() as f64);

        let mut records = Vec::new();

        for channel in channels {
            let history = self.history(&token, &channel, oldest, cancel).await?;
            for msg in &history {
                if cancel.is_cancelled() {
                    return Err(CortexError::Cancelled);
                }
                let subtype = msg.get("subtype").and_then(|v| v.as_str());
                if !is_keepable_subtype(subtype) {
                    continue;
                }
                let Some(ts_raw) = msg.get("ts").and_then(|v| v.as_str()) else { continue };
                let Some(ts) = parse_slack_ts(ts_raw) else { continue };
                let text = msg.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                let mut record = Record::new(
                    format!("{channel}:{ts_raw}"),
                    text.to_string(),
                    format!("channel/{channel}/{ts_raw}"),
                    ts,
                );
                record.project = project.clone();
                records.push(record);

                if include_threads {
                    if let Some(thread_ts) = msg.get("thread_ts").and_then(|v| v.as_str()) {
                        if thread_ts == ts_raw {
                            let replies = self.thread_replies(&token, &channel, thread_ts, cancel).await?;
                            for reply in replies {
                                let Some(reply_ts_raw) = reply.get("ts").and_then(|v| v.as_str()) else { continue };
                                if reply_ts_raw == thread_ts {
                                    continue;
                                }
                                let Some(reply_ts) = parse_slack_ts(reply_ts_raw) else { continue };
                                let reply_text = reply.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                                if reply_text.is_empty() {
                                    continue;
                                }
                                let mut reply_record = Record::new(
                                    format!("{channel}:{reply_ts_raw}"),
                                    reply_text.to_string(),
                                    format!("channel/{channel}/{reply_ts_raw}"),
                                    reply_ts,
                                );
                                reply_record.section = Some(format!("thread:{thread_ts}"));
                                reply_record.project = project.clone();
                                records.push(reply_record);
                            }
                        }
                    }
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl GroupChatProvider {
    async fn history(&self, token: &str, channel: &str, oldest: Option<f64>, cancel: &CancellationToken) -> Result<Vec<Value>> {
        let mut cursor: Option<String> = None;
        let mut out = Vec::new();
        for _ in 0..MAX_HISTORY_PAGES {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let mut url = format!("{}/conversations.history?channel={channel}&limit=200", self.base_url);
            if let Some(o) = oldest {
                url.push_str(&format!("&oldest={o}"));
            }
            if let Some(c) = &cursor {
                url.push_str(&format!("&cursor={c}"));
            }
            let body = self.get_json(token, &url).await?;
            out.extend(body.get("messages").and_then(|v| v.as_array()).cloned().unwrap_or_default());
            cursor = body
                .get("response_metadata")
                .and_then(|m| m.get("next_cursor"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn thread_replies(&self, token: &str, channel: &str, thread_ts: &str, cancel: &CancellationToken) -> Result<Vec<Value>> {
        let mut cursor: Option<String> = None;
        let mut out = Vec::new();
        for _ in 0..MAX_THREAD_PAGES {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let mut url = format!("{}/conversations.replies?channel={channel}&ts={thread_ts}&limit=200", self.base_url);
            if let Some(c) = &cursor {
                url.push_str(&format!("&cursor={c}"));
            }
            let body = self.get_json(token, &url).await?;
            out.extend(body.get("messages").and_then(|v| v.as_array()).cloned().unwrap_or_default());
            cursor = body
                .get("response_metadata")
                .and_then(|m| m.get("next_cursor"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn get_json(&self, token: &str, url: &str) -> Result<Value> {
        self.limiter.wait().await;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CortexError::Auth(format!("group chat rejected credentials ({status})")));
        }
        let body: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
        if body.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let err = body.get("error").and_then(|v| v.as_str()).unwrap_or("unknown");
            return Err(CortexError::Parse(format!("group chat api error: {err}")));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepable_subtype_allows_plain_and_file_and_broadcast() {
        assert!(is_keepable_subtype(None));
        assert!(is_keepable_subtype(Some("file_share")));
        assert!(is_keepable_subtype(Some("thread_broadcast")));
        assert!(!is_keepable_subtype(Some("channel_join")));
    }

    #[test]
    fn validate_config_accepts_either_token_prefix() {
        let provider = GroupChatProvider::new();
        assert!(provider.validate_config(&json!({ "token": "xoxb-1", "channels": ["c1"] })).is_ok());
        assert!(provider.validate_config(&json!({ "token": "xoxp-1", "channels": ["c1"] })).is_ok());
        assert!(provider.validate_config(&json!({ "token": "bad-1", "channels": ["c1"] })).is_err());
    }

    #[test]
    fn validate_config_requires_nonempty_channels() {
        let provider = GroupChatProvider::new();
        assert!(provider.validate_config(&json!({ "token": "xoxb-1", "channels": [] })).is_err());
    }
}
