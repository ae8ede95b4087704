//! Calendar connector.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::{CortexError, Result};
use cortex_core::model::MemoryClass;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, Record, require_str, require_str_array};
use crate::rate_limit::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
const DEFAULT_DAYS_BACK: i64 = 90;
const DEFAULT_DAYS_FORWARD: i64 = 30;

pub struct CalendarProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl CalendarProvider {
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

impl Default for CalendarProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_event(title: &str, attendee_count: usize) -> MemoryClass {
    let lower = title.to_lowercase();
    if lower.contains("standup") || lower.contains("sync") {
        return MemoryClass::Status;
    }
    if lower.contains("review") || lower.contains("retro") || lower.contains("1:1") || attendee_count > 2 {
        return MemoryClass::Decision;
    }
    MemoryClass::empty()
}

/// Pure mapping from a raw calendar-API event to a [`Record`], or `None`
/// when the event should be skipped (cancelled, no start time).
pub(crate) fn event_to_record(calendar_id: &str, event: &Value, project: Option<&str>) -> Option<Record> {
    if event.get("status").and_then(|v| v.as_str()) == Some("cancelled") {
        return None;
    }
    let id = event.get("id").and_then(|v| v.as_str())?.to_string();
    let title = event.get("summary").and_then(|v| v.as_str()).unwrap_or("(untitled)");
    let attendee_count = event.get("attendees").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);

    let start = event.get("start")?;
    let (ts, all_day) = if let Some(date_time) = start.get("dateTime").and_then(|v| v.as_str()) {
        let dt = DateTime::parse_from_rfc3339(date_time).ok()?.with_timezone(&Utc);
        (dt, false)
    } else if let Some(date) = start.get("date").and_then(|v| v.as_str()) {
        let dt = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0)?;
        (DateTime::from_naive_utc_and_offset(dt, Utc), true)
    } else {
        return None;
    };

    let mut content = format!("{title}\n");
    if all_day {
        content.push_str("(all day)\n");
    }
    if let Some(description) = event.get("description").and_then(|v| v.as_str()) {
        content.push_str(description);
    }

    let mut record = Record::new(id.clone(), content, format!("{calendar_id}/event/{id}"), ts);
    record.memory_class = classify_event(title, attendee_count);
    record.project = project.map(str::to_string);
    Some(record)
}

#[async_trait]
impl Provider for CalendarProvider {
    fn name(&self) -> &'static str {
        "calendar"
    }

    fn display_name(&self) -> &'static str {
        "Calendar"
    }

    fn default_config(&self) -> Value {
        json!({
            "access_token": "",
            "calendars": [],
            "days_back": DEFAULT_DAYS_BACK,
            "days_forward": DEFAULT_DAYS_FORWARD,
            "project": null,
        })
    }

    fn validate_config(&self, cfg: &Value) -> Result<()> {
        require_str(cfg, "access_token")?;
        require_str_array(cfg, "calendars")?;
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
        let calendars: Vec<String> = require_str_array(cfg, "calendars")?.into_iter().map(str::to_string).collect();
        let days_back = cfg.get("days_back").and_then(|v| v.as_i64()).unwrap_or(DEFAULT_DAYS_BACK);
        let days_forward = cfg.get("days_forward").and_then(|v| v.as_i64()).unwrap_or(DEFAULT_DAYS_FORWARD);
        let project = cfg.get("project").and_then(|v| v.as_str()).map(str::to_string);

        let now = Utc::now();
        let time_min = now - chrono::Duration::days(days_back);
        let time_max = now + chrono::Duration::days(days_forward);

        let mut records = Vec::new();
        for calendar_id in calendars {
            if cancel.is_cancelled() {
                return Err(CortexError::Cancelled);
            }
            let events = self.list_events(&token, &calendar_id, time_min, time_max, cancel).await?;
            for event in events {
                let Some(mut record) = event_to_record(&calendar_id, &event, project.as_deref()) else { continue };
                if let Some(since) = since {
                    if record.timestamp <= since {
                        continue;
                    }
                }
                record.agent_id = None;
                records.push(record);
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl CalendarProvider {
    async fn list_events(
        &self,
        token: &str,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }
        self.limiter.wait().await;
        let url = format!(
            "{}/calendars/{}/events?timeMin={}&timeMax={}&singleEvents=true",
            self.base_url,
            urlencoding::encode(calendar_id),
            time_min.to_rfc3339(),
            time_max.to_rfc3339(),
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CortexError::TransientNetwork(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CortexError::Auth(format!("calendar rejected credentials ({status})")));
        }
        let body: Value = response.json().await.map_err(|e| CortexError::Parse(e.to_string()))?;
        Ok(body.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_attendee_event_classifies_decision() {
        let event = json!({
            "id": "e1",
            "summary": "Launch planning",
            "status": "confirmed",
            "start": { "dateTime": "2026-01-01T10:00:00Z" },
            "attendees": [{}, {}, {}],
        });
        let record = event_to_record("primary", &event, Some("work")).unwrap();
        assert_eq!(record.memory_class, MemoryClass::Decision);
        assert_eq!(record.project.as_deref(), Some("work"));
    }

    #[test]
    fn standup_title_classifies_status() {
        let event = json!({
            "id": "e2",
            "summary": "Daily standup",
            "status": "confirmed",
            "start": { "dateTime": "2026-01-01T09:00:00Z" },
        });
        let record = event_to_record("primary", &event, None).unwrap();
        assert_eq!(record.memory_class, MemoryClass::Status);
    }

    #[test]
    fn all_day_event_mentions_all_day() {
        let event = json!({
            "id": "e3",
            "summary": "Company holiday",
            "status": "confirmed",
            "start": { "date": "2026-01-01" },
        });
        let record = event_to_record("primary", &event, None).unwrap();
        assert!(record.content.contains("all day"));
    }

    #[test]
    fn cancelled_event_is_skipped() {
        let event = json!({
            "id": "e4",
            "summary": "Cancelled sync",
            "status": "cancelled",
            "start": { "dateTime": "2026-01-01T09:00:00Z" },
        });
        assert!(event_to_record("primary", &event, None).is_none());
    }
}
