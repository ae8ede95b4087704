//! Connector row persistence. Shares the `connectors`
//! table defined by `cortex_store::migrations` but is queried directly
//! here rather than through `cortex_core::Store`, since connector
//! bookkeeping is a sync-engine concern, not a memory/fact concern.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use cortex_core::error::{CortexError, Result};
use cortex_core::model::Connector;
use rusqlite::{Connection, OptionalExtension, params};
use tokio_util::sync::CancellationToken;

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(rusqlite::Error::InvalidColumnType(0, format!("unparseable timestamp: {raw}"), rusqlite::types::Type::Text))
}

fn row_to_connector(row: &rusqlite::Row) -> rusqlite::Result<Connector> {
    let config_raw: String = row.get("config")?;
    let last_sync_raw: Option<String> = row.get("last_sync_at")?;
    Ok(Connector {
        id: row.get("id")?,
        provider: row.get("provider")?,
        config: serde_json::from_str(&config_raw).unwrap_or(serde_json::Value::Null),
        enabled: row.get::<_, i64>("enabled")? != 0,
        last_sync_at: last_sync_raw.map(|s| parse_ts(&s)).transpose()?,
        last_error: row.get("last_error")?,
        records_imported: row.get::<_, i64>("records_imported")? as u64,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

#[async_trait]
pub trait ConnectorStore: Send + Sync {
    async fn add(&self, provider: &str, config: serde_json::Value, cancel: &CancellationToken) -> Result<Connector>;
    async fn get(&self, provider: &str, cancel: &CancellationToken) -> Result<Option<Connector>>;
    async fn get_by_id(&self, id: i64, cancel: &CancellationToken) -> Result<Option<Connector>>;
    async fn list(&self, enabled_only: bool, cancel: &CancellationToken) -> Result<Vec<Connector>>;
    async fn update_config(&self, provider: &str, config: serde_json::Value, cancel: &CancellationToken) -> Result<()>;
    async fn set_enabled(&self, provider: &str, enabled: bool, cancel: &CancellationToken) -> Result<()>;
    async fn record_sync_success(&self, provider: &str, imported: u64, cancel: &CancellationToken) -> Result<()>;
    async fn record_sync_error(&self, provider: &str, message: &str, cancel: &CancellationToken) -> Result<()>;
    async fn remove(&self, provider: &str, cancel: &CancellationToken) -> Result<bool>;
}

#[derive(Clone)]
pub struct SqliteConnectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConnectorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| CortexError::Store(e.to_string()))?;
        cortex_store::migrations::apply(&conn).map_err(|e| CortexError::Store(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CortexError::Store(e.to_string()))?;
        cortex_store::migrations::apply(&conn).map_err(|e| CortexError::Store(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Shares an already-open connection (e.g. the same file the memory
    /// store uses) rather than opening a second handle to the same DB.
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    async fn with_conn<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("connector store mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| CortexError::Store(format!("blocking task panicked: {e}")))?
        .map_err(CortexError::classify_store_error)
    }
}

#[async_trait]
impl ConnectorStore for SqliteConnectorStore {
    async fn add(&self, provider: &str, config: serde_json::Value, cancel: &CancellationToken) -> Result<Connector> {
        let provider = provider.to_string();
        self.with_conn(cancel, move |conn| {
            let now = format_ts(Utc::now());
            let config_json = serde_json::to_string(&config).unwrap_or_default();
            conn.execute(
                "INSERT INTO connectors (provider, config, enabled, last_error, records_imported, created_at, updated_at)
                 VALUES (?1, ?2, 1, '', 0, ?3, ?3)",
                params![provider, config_json, now],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row("SELECT * FROM connectors WHERE id = ?1", params![id], row_to_connector)
        })
        .await
    }

    async fn get(&self, provider: &str, cancel: &CancellationToken) -> Result<Option<Connector>> {
        let provider = provider.to_string();
        self.with_conn(cancel, move |conn| {
            conn.query_row("SELECT * FROM connectors WHERE provider = ?1", params![provider], row_to_connector)
                .optional()
        })
        .await
    }

    async fn get_by_id(&self, id: i64, cancel: &CancellationToken) -> Result<Option<Connector>> {
        self.with_conn(cancel, move |conn| {
            conn.query_row("SELECT * FROM connectors WHERE id = ?1", params![id], row_to_connector).optional()
        })
        .await
    }

    async fn list(&self, enabled_only: bool, cancel: &CancellationToken) -> Result<Vec<Connector>> {
        self.with_conn(cancel, move |conn| {
            let sql = if enabled_only {
                "SELECT * FROM connectors WHERE enabled = 1 ORDER BY provider"
            } else {
                "SELECT * FROM connectors ORDER BY provider"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], row_to_connector)?;
            rows.collect()
        })
        .await
    }

    async fn update_config(&self, provider: &str, config: serde_json::Value, cancel: &CancellationToken) -> Result<()> {
        let provider = provider.to_string();
        self.with_conn(cancel, move |conn| {
            let now = format_ts(Utc::now());
            let config_json = serde_json::to_string(&config).unwrap_or_default();
            conn.execute(
                "UPDATE connectors SET config = ?1, updated_at = ?2 WHERE provider = ?3",
                params![config_json, now, provider],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_enabled(&self, provider: &str, enabled: bool, cancel: &CancellationToken) -> Result<()> {
        let provider = provider.to_string();
        self.with_conn(cancel, move |conn| {
            let now = format_ts(Utc::now());
            conn.execute(
                "UPDATE connectors SET enabled = ?1, updated_at = ?2 WHERE provider = ?3",
                params![enabled as i64, now, provider],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_sync_success(&self, provider: &str, imported: u64, cancel: &CancellationToken) -> Result<()> {
        let provider = provider.to_string();
        self.with_conn(cancel, move |conn| {
            let now = format_ts(Utc::now());
            conn.execute(
                "UPDATE connectors SET last_sync_at = ?1, last_error = '', records_imported = records_imported + ?2, updated_at = ?1
                 WHERE provider = ?3",
                params![now, imported as i64, provider],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_sync_error(&self, provider: &str, message: &str, cancel: &CancellationToken) -> Result<()> {
        let provider = provider.to_string();
        let message = message.to_string();
        self.with_conn(cancel, move |conn| {
            let now = format_ts(Utc::now());
            conn.execute(
                "UPDATE connectors SET last_sync_at = ?1, last_error = ?2, updated_at = ?1 WHERE provider = ?3",
                params![now, message, provider],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, provider: &str, cancel: &CancellationToken) -> Result<bool> {
        let provider = provider.to_string();
        self.with_conn(cancel, move |conn| {
            let affected = conn.execute("DELETE FROM connectors WHERE provider = ?1", params![provider])?;
            Ok(affected > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = SqliteConnectorStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let added = store.add("local-vault", serde_json::json!({ "vault_path": "/tmp" }), &cancel).await.unwrap();
        assert!(added.enabled);

        let found = store.get("local-vault", &cancel).await.unwrap().unwrap();
        assert_eq!(found.provider, "local-vault");
        assert_eq!(found.records_imported, 0);
    }

    #[tokio::test]
    async fn duplicate_add_is_classified_as_duplicate() {
        let store = SqliteConnectorStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        store.add("local-vault", serde_json::json!({}), &cancel).await.unwrap();
        let err = store.add("local-vault", serde_json::json!({}), &cancel).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn record_sync_success_accumulates_imported_count() {
        let store = SqliteConnectorStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        store.add("local-vault", serde_json::json!({}), &cancel).await.unwrap();
        store.record_sync_success("local-vault", 3, &cancel).await.unwrap();
        store.record_sync_success("local-vault", 2, &cancel).await.unwrap();
        let found = store.get("local-vault", &cancel).await.unwrap().unwrap();
        assert_eq!(found.records_imported, 5);
        assert!(found.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn record_sync_error_sets_last_error() {
        let store = SqliteConnectorStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        store.add("local-vault", serde_json::json!({}), &cancel).await.unwrap();
        store.record_sync_error("local-vault", "auth failed", &cancel).await.unwrap();
        let found = store.get("local-vault", &cancel).await.unwrap().unwrap();
        assert_eq!(found.last_error, "auth failed");
    }

    #[tokio::test]
    async fn list_enabled_only_filters_disabled() {
        let store = SqliteConnectorStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        store.add("local-vault", serde_json::json!({}), &cancel).await.unwrap();
        store.add("mail", serde_json::json!({}), &cancel).await.unwrap();
        store.set_enabled("mail", false, &cancel).await.unwrap();

        let enabled = store.list(true, &cancel).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].provider, "local-vault");

        let all = store.list(false, &cancel).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
