//! Message-oriented chat platform connector, snowflake-timestamped.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cortex_core::error::{CortexError, Result};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str};
use crate::providers::sanitize_name;
use crate::rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
/// Discord snowflake epoch, 2015-01-01T00:00:00Z, in milliseconds since Unix epoch.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

pub struct ChatPlatformProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl ChatPlatformProvider {
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
            limiter: RateLimiter::new(Duration::from_millis(20)),
        }
    }
}

impl Default for ChatPlatformProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Snowflake IDs encode their creation time in the high bits; used both
/// for ordering and for the `since` cutoff.
pub(crate) fn snowflake_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let raw: i64 = id.parse().ok()?;
    let ms = (raw >> 22) + DISCORD_EPOCH_MS;
    Utc.timestamp_millis_opt(ms).single()
}

#[async_trait]
impl Provider for ChatPlatformProvider {
    fn name(&self) -> &'static str {
        "chat-platform"
    }

    fn display_name(&self) -> &'static str {
        "Chat Platform"
    }

    fn default_config(&self) -> Value {
        json!({
            "token": "Bot <token>",
            "guild_id": "",
            "channel_ids": [],
            "include_threads": true,
            "include_pins": true,
            "lookback_days": 30,
            "max_messages": 200,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        let token = require_str(cfg, "token")?;
        if !token.starts_with("Bot ") {
            return Err(CortexError::InvalidConfig("token must start with \"Bot \"".into()));
        }
        require_str(cfg, "guild_id")?;
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
        let guild_id = require_str(cfg, "guild_id")?.to_string();
        let include_threads = cfg.get("include_threads").and_then(|v| v.as_bool()).unwrap_or(true);
        let include_pins = cfg.get("include_pins").and_then(|v| v.as_bool()).unwrap_or(true);
        let max_messages = cfg.get("max_messages").and_then(|v| v.as_u64()).unwrap_or(200) as usize;
        let guild_name = sanitize_name(&guild_id);

        let channel_ids: Vec<String> = match cfg.get("channel_ids").and_then(|v| v.as_array()) {
            Some(arr) if !arr.is_empty() => arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => self.list_channels(&token, &guild_id, cancel).await?,
        };

        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for channel_id in channel_ids {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let channel_name = sanitize_name(&channel_id);

            let pinned_ids: HashSet<String> = if include_pins {
                self.fetch_pins(&token, &channel_id, cancel)
                    .await?
                    .into_iter()
                    .map(|m| m.id)
                    .collect()
            } else {
                HashSet::new()
            };

            let messages = self.fetch_messages(&token, &channel_id, max_messages, cancel).await?;
            for msg in messages {
                if !seen.insert(msg.id.clone()) {
                    continue;
                }
                let Some(ts) = snowflake_timestamp(&msg.id) else { continue };
                if let Some(since) = since {
                    if ts <= since {
                        continue;
                    }
                }
                let pinned = pinned_ids.contains(&msg.id);
                let content = if pinned {
                    format!("[PINNED] {}", msg.content)
                } else {
                    msg.content.clone()
                };
                records.push(Record::new(
                    msg.id.clone(),
                    content,
                    format!("guild/{guild_name}/channel/{channel_name}/msg/{}", msg.id),
                    ts,
                ));
            }

            if include_threads {
                for thread in self.fetch_archived_threads(&token, &channel_id, cancel).await? {
                    let thread_messages = self.fetch_messages(&token, &thread.id, max_messages, cancel).await?;
                    let section = thread.name.clone();
                    for msg in thread_messages {
                        if !seen.insert(msg.id.clone()) {
                            continue;
                        }
                        let Some(ts) = snowflake_timestamp(&msg.id) else { continue };
                        if let Some(since) = since {
                            if ts <= since {
                                continue;
                            }
                        }
                        let mut record = Record::new(
                            msg.id.clone(),
                            msg.content.clone(),
                            format!("guild/{guild_name}/channel/{channel_name}/msg/{}", msg.id),
                            ts,
                        );
                        record.section = Some(section.clone());
                        records.push(record);
                    }
                }
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

struct RawMessage {
    id: String,
    content: String,
}

struct RawThread {
    id: String,
    name: String,
}

impl ChatPlatformProvider {
    async fn list_channels(&self, token: &str, guild_id: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let url = format!("{}/guilds/{guild_id}/channels", self.base_url);
        let body = self.get_json(token, &url, cancel).await?;
        Ok(body
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| c.get("id").and_then(|v| v.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_messages(&self, token: &str, channel_id: &str, limit: usize, cancel: &CancellationToken) -> Result<Vec<RawMessage>> {
        let mut out = Vec::new();
        let mut before: Option<String> = None;
        loop {
            if out.len() >= limit || cancel.is_cancelled() {
                break;
            }
            let page_size = 100.min(limit - out.len());
            let mut url = format!("{}/channels/{channel_id}/messages?limit={page_size}", self.base_url);
            if let Some(b) = &before {
                url.push_str(&format!("&before={b}"));
            }
            let body = self.get_json(token, &url, cancel).await?;
            let Some(arr) = body.as_array() else { break };
            if arr.is_empty() {
                break;
            }
            for item in arr {
                let id = item.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let content = item.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                before = Some(id.clone());
                out.push(RawMessage { id, content });
            }
        }
        Ok(out)
    }

    async fn fetch_pins(&self, token: &str, channel_id: &str, cancel: &CancellationToken) -> Result<Vec<RawMessage>> {
        let url = format!("{}/channels/{channel_id}/pins", self.base_url);
        let body = self.get_json(token, &url, cancel).await?;
        Ok(body
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|item| RawMessage {
                        id: item.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        content: item.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_archived_threads(&self, token: &str, channel_id: &str, cancel: &CancellationToken) -> Result<Vec<RawThread>> {
        let url = format!("{}/channels/{channel_id}/threads/archived/public", self.base_url);
        let body = self.get_json(token, &url, cancel).await?;
        Ok(body
            .get("threads")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|t| RawThread {
                        id: t.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: t.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_json(&self, token: &str, url: &str, cancel: &CancellationToken) -> Result<Value> {
        for attempt in 1..=crate::rate_limit::MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            self.limiter.wait().await;
            let response = self
                .client
                .get(url)
                .header("Authorization", token)
                .send()
                .await
                .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(CortexError::Auth(format!("chat-platform rejected credentials ({status})")));
            }
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(1.0);
                self.limiter.back_off(Duration::from_secs_f64(retry_after)).await;
                if attempt == crate::rate_limit::MAX_ATTEMPTS {
                    return Err(CortexError::RateLimited(format!("chat-platform 429 after {attempt} attempts")));
                }
                continue;
            }
            return response.json().await.map_err(|e| CortexError::Parse(e.to_string()));
        }
        unreachable!("loop always returns or errors")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Binds an ephemeral local listener, accepts a single connection, and
    /// replies with a fixed JSON body regardless of what was requested.
    /// Returns the base URL a provider's `with_base_url` can point at.
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
    async fn fetch_imports_a_pinned_message_from_the_configured_channel() {
        let base_url = serve_once_json(r#"[{"id":"175928847299117063","content":"deploy went out"}]"#).await;
        let provider = ChatPlatformProvider::with_base_url(base_url);
        let cfg = json!({
            "token": "Bot abc123",
            "guild_id": "g1",
            "channel_ids": ["9001"],
            "include_threads": false,
            "include_pins": false,
            "max_messages": 1,
        });
        let cancel = CancellationToken::new();

        let records = provider.fetch(&cfg, None, &cancel).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "deploy went out");
        assert!(records[0].source.contains("guild/g1/channel/9001"));
    }

    #[test]
    fn snowflake_timestamp_matches_known_epoch() {
        // id 0 encodes exactly the Discord epoch.
        let ts = snowflake_timestamp("0").unwrap();
        assert_eq!(ts.timestamp_millis(), DISCORD_EPOCH_MS);
    }

    #[test]
    fn validate_config_requires_bot_prefixed_token() {
        let provider = ChatPlatformProvider::new();
        let bad = json!({ "token": "notbot", "guild_id": "g1" });
        assert!(provider.validate_config(&bad).is_err());
        let good = json!({ "token": "Bot abc123", "guild_id": "g1" });
        assert!(provider.validate_config(&good).is_ok());
    }

    #[test]
    fn validate_config_requires_guild_id() {
        let provider = ChatPlatformProvider::new();
        let bad = json!({ "token": "Bot abc123" });
        assert!(provider.validate_config(&bad).is_err());
    }
}
