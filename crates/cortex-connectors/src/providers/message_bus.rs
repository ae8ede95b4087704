//! Update-polled message bus connector.
//!
//! Mirrors the long-poll `offset` loop of a Telegram-style bot API:
//! `getUpdates` drains forward until an empty batch, maintaining
//! `offset = max(update_id) + 1` for the duration of one fetch call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cortex_core::error::{CortexError, Result};
use regex::Regex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str};
use crate::rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
const TOKEN_PATTERN: &str = r"^\d+:.{8,}$";

pub struct MessageBusProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl MessageBusProvider {
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
            limiter: RateLimiter::none(),
        }
    }
}

impl Default for MessageBusProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a message's text from whichever of text/caption/media markers
/// is present, prefixed with forward/reply context.
pub(crate) fn synthesize_body(msg: &Value) -> String {
    let mut parts = Vec::new();

    if msg.get("forward_from").is_some() || msg.get("forward_from_chat").is_some() {
        parts.push("[forwarded]".to_string());
    }
    if let Some(reply) = msg.get("reply_to_message") {
        let id = reply.get("message_id").and_then(|v| v.as_i64()).unwrap_or(0);
        let preview = reply
            .get("text")
            .and_then(|v| v.as_str())
            .or_else(|| reply.get("caption").and_then(|v| v.as_str()))
            .unwrap_or("")
            .chars()
            .take(40)
            .collect::<String>();
        parts.push(format!("reply to #{id}: {preview}"));
    }

    let body = if let Some(text) = msg.get("text").and_then(|v| v.as_str()) {
        text.to_string()
    } else if let Some(caption) = msg.get("caption").and_then(|v| v.as_str()) {
        caption.to_string()
    } else if msg.get("photo").is_some() {
        "[photo]".to_string()
    } else if msg.get("document").is_some() {
        "[document]".to_string()
    } else {
        String::new()
    };

    if !body.is_empty() {
        parts.push(body);
    }
    parts.join(" ")
}

pub(crate) fn reply_section(msg: &Value) -> Option<String> {
    msg.get("reply_to_message")
        .and_then(|r| r.get("message_id"))
        .and_then(|v| v.as_i64())
        .map(|id| format!("reply:{id}"))
}

#[async_trait]
impl Provider for MessageBusProvider {
    fn name(&self) -> &'static str {
        "message-bus"
    }

    fn display_name(&self) -> &'static str {
        "Message Bus"
    }

    fn default_config(&self) -> Value {
        json!({
            "bot_token": "<digits>:<secret>",
            "chat_ids": [],
            "lookback_days": 7,
            "max_messages": 200,
            "include_media_captions": true,
            "skip_bot_messages": true,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        let token = require_str(cfg, "bot_token")?;
        let re = Regex::new(TOKEN_PATTERN).expect("static pattern compiles");
        if !re.is_match(token) {
            return Err(CortexError::InvalidConfig(
                "bot_token must look like \"<digits>:<secret of at least 8 chars>\"".into(),
            ));
        }
        let chat_ids = cfg
            .get("chat_ids")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CortexError::InvalidConfig("chat_ids is required".into()))?;
        if chat_ids.is_empty() || chat_ids.iter().any(|v| v.as_i64() == Some(0)) {
            return Err(CortexError::InvalidConfig("chat_ids must be non-empty and non-zero".into()));
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
        let token = require_str(cfg, "bot_token")?.to_string();
        let chat_ids: Vec<i64> = cfg["chat_ids"].as_array().unwrap().iter().filter_map(|v| v.as_i64()).collect();
        let max_messages = cfg.get("max_messages").and_then(|v| v.as_u64()).unwrap_or(200) as usize;
        let skip_bots = cfg.get("skip_bot_messages").and_then(|v| v.as_bool()).unwrap_or(true);

        let mut offset = 0i64;
        let mut records = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            if records.len() >= max_messages {
                break;
            }
            self.limiter.wait().await;
            let url = format!("{}/bot{token}/getUpdates?offset={offset}&timeout=0", self.base_url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(CortexError::Auth(format!("message-bus rejected credentials ({status})")));
            }
            let body: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
            let updates = body.get("result").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            if updates.is_empty() {
                break;
            }

            for update in &updates {
                let update_id = update.get("update_id").and_then(|v| v.as_i64()).unwrap_or(0);
                offset = offset.max(update_id + 1);

                let Some(msg) = update.get("message") else { continue };
                let chat_id = msg.get("chat").and_then(|c| c.get("id")).and_then(|v| v.as_i64());
                let Some(chat_id) = chat_id else { continue };
                if !chat_ids.contains(&chat_id) {
                    continue;
                }
                if skip_bots && msg.get("from").and_then(|f| f.get("is_bot")).and_then(|v| v.as_bool()) == Some(true) {
                    continue;
                }

                let message_id = msg.get("message_id").and_then(|v| v.as_i64()).unwrap_or(0);
                let unix_ts = msg.get("date").and_then(|v| v.as_i64()).unwrap_or(0);
                let Some(ts) = Utc.timestamp_opt(unix_ts, 0).single() else { continue };
                if let Some(since) = since {
                    if ts <= since {
                        continue;
                    }
                }

                let body_text = synthesize_body(msg);
                if body_text.is_empty() {
                    continue;
                }

                let mut record = Record::new(
                    format!("{chat_id}:{message_id}"),
                    body_text,
                    format!("chat/{chat_id}/msg/{message_id}"),
                    ts,
                );
                record.section = reply_section(msg);
                records.push(record);

                if records.len() >= max_messages {
                    break;
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}
