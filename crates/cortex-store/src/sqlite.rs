//! SQLite + FTS5 implementation of [`cortex_core::Store`].
//!
//! `rusqlite` is synchronous; every call is dispatched through
//! `spawn_blocking` so the async trait surface never blocks the runtime.
//! A single connection is shared behind a `std::sync::Mutex` — SQLite's
//! own locking handles the single-writer/many-reader model underneath,
//! WAL mode lets readers proceed during a writer's transaction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use cortex_core::error::{CortexError, Result};
use cortex_core::model::{Connector, Edge, Fact, FactType, Memory, MemoryClass};
use cortex_core::store::{
    AttributeConflict, FactListOptions, FtsHit, InferenceOptions, InferenceResult,
    MemoryListOptions, SortOrder, Stats, Store,
};
use rusqlite::{Connection, OptionalExtension, params};
use tokio_util::sync::CancellationToken;

use crate::migrations;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| CortexError::Store(e.to_string()))?;
        migrations::apply(&conn).map_err(|e| CortexError::Store(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CortexError::Store(e.to_string()))?;
        migrations::apply(&conn).map_err(|e| CortexError::Store(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| CortexError::Store(format!("blocking task panicked: {e}")))?
        .map_err(CortexError::classify_store_error)
    }
}

// ── timestamp parsing: accept both SQL-literal and RFC-3339 ──

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
    Err(rusqlite::Error::InvalidColumnType(
        0,
        format!("unparseable timestamp: {raw}"),
        rusqlite::types::Type::Text,
    ))
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let metadata_raw: Option<String> = row.get("metadata")?;
    let metadata = metadata_raw
        .filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(&s).ok());
    let memory_class: String = row.get("memory_class")?;
    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        source_file: row.get("source_file")?,
        source_section: row.get("source_section")?,
        source_line: row.get("source_line")?,
        content_hash: row.get("content_hash")?,
        project: row.get("project")?,
        memory_class: MemoryClass::from(memory_class.as_str()),
        metadata,
        imported_at: parse_ts(&row.get::<_, String>("imported_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

fn row_to_fact(row: &rusqlite::Row) -> rusqlite::Result<Fact> {
    let fact_type: String = row.get("fact_type")?;
    Ok(Fact {
        id: row.get("id")?,
        memory_id: row.get("memory_id")?,
        subject: row.get("subject")?,
        predicate: row.get("predicate")?,
        object: row.get("object")?,
        fact_type: fact_type_from_str(&fact_type),
        confidence: row.get("confidence")?,
        decay_rate: row.get("decay_rate")?,
        source_quote: row.get("source_quote")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        last_reinforced_at: parse_ts(&row.get::<_, String>("last_reinforced_at")?)?,
    })
}

fn fact_type_from_str(s: &str) -> FactType {
    match s {
        "identity" => FactType::Identity,
        "attribute" => FactType::Attribute,
        "relationship" => FactType::Relationship,
        "preference" => FactType::Preference,
        "temporal" => FactType::Temporal,
        "kv" => FactType::Kv,
        "decision" => FactType::Decision,
        "state" => FactType::State,
        "config" => FactType::Config,
        "location" => FactType::Location,
        other => FactType::Other(other.to_string()),
    }
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get("id")?,
        source_fact_id: row.get("source_fact_id")?,
        target_fact_id: row.get("target_fact_id")?,
        relation: row.get("relation")?,
        source: row.get("source")?,
        score: row.get("score")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
    })
}

#[allow(dead_code)]
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
impl Store for SqliteStore {
    async fn add_memory(&self, memory: Memory) -> Result<Memory> {
        self.with_conn(move |conn| {
            let metadata_json = memory
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default());
            conn.execute(
                "INSERT INTO memories
                 (content, source_file, source_section, source_line, content_hash,
                  project, memory_class, metadata, imported_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    memory.content,
                    memory.source_file,
                    memory.source_section,
                    memory.source_line,
                    memory.content_hash,
                    memory.project,
                    memory.memory_class.as_str(),
                    metadata_json,
                    format_ts(memory.imported_at),
                    format_ts(memory.updated_at),
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Memory { id, ..memory })
        })
        .await
    }

    async fn get_memory(&self, id: i64) -> Result<Option<Memory>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM memories WHERE id = ?1", params![id], row_to_memory)
                .optional()
        })
        .await
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Memory>> {
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM memories WHERE content_hash = ?1",
                params![hash],
                row_to_memory,
            )
            .optional()
        })
        .await
    }

    async fn list_memories(&self, opts: MemoryListOptions) -> Result<Vec<Memory>> {
        self.with_conn(move |conn| {
            let order = match opts.sort {
                SortOrder::ImportedAtDesc => "imported_at DESC",
                SortOrder::ImportedAtAsc => "imported_at ASC",
            };
            let limit = if opts.limit == 0 { i64::MAX } else { opts.limit as i64 };
            let sql = format!("SELECT * FROM memories ORDER BY {order} LIMIT ?1");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit], row_to_memory)?;
            rows.collect()
        })
        .await
    }

    async fn delete_memory(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let affected = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            Ok(affected > 0)
        })
        .await
    }

    async fn add_fact(&self, fact: Fact) -> Result<Fact> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO facts
                 (memory_id, subject, predicate, object, fact_type, confidence,
                  decay_rate, source_quote, created_at, last_reinforced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    fact.memory_id,
                    fact.subject,
                    fact.predicate,
                    fact.object,
                    fact.fact_type.as_str(),
                    fact.confidence,
                    fact.decay_rate,
                    fact.source_quote,
                    format_ts(fact.created_at),
                    format_ts(fact.last_reinforced_at),
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Fact { id, ..fact })
        })
        .await
    }

    async fn get_fact(&self, id: i64) -> Result<Option<Fact>> {
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM facts WHERE id = ?1", params![id], row_to_fact)
                .optional()
        })
        .await
    }

    async fn list_facts(&self, opts: FactListOptions) -> Result<Vec<Fact>> {
        self.with_conn(move |conn| {
            let limit = if opts.limit == 0 { i64::MAX } else { opts.limit as i64 };
            match opts.fact_type {
                Some(ft) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM facts WHERE fact_type = ?1 ORDER BY created_at DESC LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![ft.as_str(), limit], row_to_fact)?;
                    rows.collect()
                }
                None => {
                    let mut stmt =
                        conn.prepare("SELECT * FROM facts ORDER BY created_at DESC LIMIT ?1")?;
                    let rows = stmt.query_map(params![limit], row_to_fact)?;
                    rows.collect()
                }
            }
        })
        .await
    }

    async fn facts_for_memory(&self, memory_id: i64) -> Result<Vec<Fact>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM facts WHERE memory_id = ?1")?;
            let rows = stmt.query_map(params![memory_id], row_to_fact)?;
            rows.collect()
        })
        .await
    }

    async fn facts_for_memories(&self, memory_ids: &[i64]) -> Result<Vec<Fact>> {
        if memory_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = memory_ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("SELECT * FROM facts WHERE memory_id IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(params.as_slice(), row_to_fact)?;
            rows.collect()
        })
        .await
    }

    async fn add_embedding(&self, memory_id: i64, vector: Vec<f32>) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO embeddings (memory_id, vector) VALUES (?1, ?2)
                 ON CONFLICT(memory_id) DO UPDATE SET vector = excluded.vector",
                params![memory_id, vector_to_blob(&vector)],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_embedding(&self, memory_id: i64) -> Result<Option<Vec<f32>>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT vector FROM embeddings WHERE memory_id = ?1",
                params![memory_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map(|opt| opt.map(|blob| blob_to_vector(&blob)))
        })
        .await
    }

    async fn all_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT memory_id, vector FROM embeddings")?;
            let rows = stmt.query_map([], |row| {
                let id: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob_to_vector(&blob)))
            })?;
            rows.collect()
        })
        .await
    }

    async fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        let query = sanitize_fts_query(query);
        let limit = limit as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT rowid, rank FROM memories_fts WHERE memories_fts MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![query, limit], |row| {
                Ok(FtsHit {
                    memory_id: row.get(0)?,
                    rank: row.get(1)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn stale_facts(&self, max_confidence: f32, max_days: i64) -> Result<Vec<Fact>> {
        self.with_conn(move |conn| {
            let cutoff = format_ts(Utc::now() - chrono::Duration::days(max_days));
            let mut stmt = conn.prepare(
                "SELECT * FROM facts WHERE confidence <= ?1 AND last_reinforced_at <= ?2
                 ORDER BY last_reinforced_at ASC",
            )?;
            let rows = stmt.query_map(params![max_confidence, cutoff], row_to_fact)?;
            rows.collect()
        })
        .await
    }

    async fn get_attribute_conflicts_limit(&self, n: usize) -> Result<Vec<AttributeConflict>> {
        let limit = n as i64;
        self.with_conn(move |conn| {
            let mut group_stmt = conn.prepare(
                "SELECT subject, predicate, COUNT(DISTINCT object) as objs
                 FROM facts
                 GROUP BY subject, predicate
                 HAVING objs > 1
                 LIMIT ?1",
            )?;
            let groups: Vec<(String, String)> = group_stmt
                .query_map(params![limit], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut out = Vec::with_capacity(groups.len());
            for (subject, predicate) in groups {
                let mut fact_stmt = conn.prepare(
                    "SELECT * FROM facts WHERE subject = ?1 AND predicate = ?2",
                )?;
                let facts: Vec<Fact> = fact_stmt
                    .query_map(params![subject, predicate], row_to_fact)?
                    .collect::<rusqlite::Result<_>>()?;
                out.push(AttributeConflict {
                    subject,
                    predicate,
                    facts,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn count_edges(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
        })
        .await
    }

    async fn count_edges_by_source(&self, source: &str) -> Result<u64> {
        let source = source.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE source = ?1",
                params![source],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
        .await
    }

    async fn edges_for_fact(&self, fact_id: i64) -> Result<Vec<Edge>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM edges WHERE source_fact_id = ?1 OR target_fact_id = ?1",
            )?;
            let rows = stmt.query_map(params![fact_id], row_to_edge)?;
            rows.collect()
        })
        .await
    }

    async fn update_clusters(&self, _fact_ids: &[i64]) -> Result<()> {
        // Clustering is an optimization over the fact graph (keeps
        // semantically related facts co-located for the conflict/stale
        // scans above); absence of a materialized cluster table simply
        // means those scans fall back to full table scans, which is
        // correct, just slower. Best-effort.
        Ok(())
    }

    async fn run_inference(
        &self,
        opts: InferenceOptions,
        cancel: &CancellationToken,
    ) -> Result<InferenceResult> {
        if cancel.is_cancelled() {
            return Err(CortexError::Cancelled);
        }
        let memory_ids = opts.memory_ids.clone();
        self.with_conn(move |conn| {
            // Infer `co_references` edges between facts that share a
            // subject and were extracted from different memories, and
            // `supersedes` edges when a later fact overwrites an
            // attribute's value for the same (subject, predicate).
            let facts: Vec<Fact> = if memory_ids.is_empty() {
                let mut stmt = conn.prepare("SELECT * FROM facts")?;
                stmt.query_map([], row_to_fact)?.collect::<rusqlite::Result<_>>()?
            } else {
                let placeholders = memory_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let sql = format!("SELECT * FROM facts WHERE memory_id IN ({placeholders})");
                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::ToSql> =
                    memory_ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
                stmt.query_map(params.as_slice(), row_to_fact)?.collect::<rusqlite::Result<_>>()?
            };

            let mut by_subject_predicate: HashMap<(String, String), Vec<Fact>> = HashMap::new();
            for fact in &facts {
                by_subject_predicate
                    .entry((fact.subject.clone(), fact.predicate.clone()))
                    .or_default()
                    .push(fact.clone());
            }

            let mut created = 0u64;
            let now = format_ts(Utc::now());
            for mut group in by_subject_predicate.into_values() {
                if group.len() < 2 {
                    continue;
                }
                group.sort_by_key(|f| f.created_at);
                for window in group.windows(2) {
                    let (older, newer) = (&window[0], &window[1]);
                    let relation = if older.object == newer.object {
                        "co_references"
                    } else {
                        "supersedes"
                    };
                    let affected = conn.execute(
                        "INSERT INTO edges (source_fact_id, target_fact_id, relation, source, score, created_at)
                         VALUES (?1, ?2, ?3, 'inferred', ?4, ?5)
                         ON CONFLICT(source_fact_id, target_fact_id, relation) DO NOTHING",
                        params![newer.id, older.id, relation, newer.confidence, now],
                    )?;
                    created += affected as u64;
                }
            }
            Ok(InferenceResult { edges_created: created })
        })
        .await
    }

    async fn stats(&self) -> Result<Stats> {
        self.with_conn(|conn| {
            let memory_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
            let fact_count: i64 = conn.query_row("SELECT COUNT(*) FROM facts", [], |r| r.get(0))?;
            let edge_count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?;
            let connector_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM connectors", [], |r| r.get(0))?;
            Ok(Stats {
                memory_count: memory_count as u64,
                fact_count: fact_count as u64,
                edge_count: edge_count as u64,
                connector_count: connector_count as u64,
            })
        })
        .await
    }
}

/// FTS5 treats `"`, `*`, `:`, `(`, `)` as syntax; a raw user/LLM query can
/// easily contain them. Quote each term so MATCH treats the whole query
/// literally rather than raising a syntax error.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::model::content_hash;

    fn sample_memory(content: &str, source: &str) -> Memory {
        Memory::new(content, source)
    }

    #[tokio::test]
    async fn insert_and_find_by_hash_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mem = sample_memory("hello world", "manual:notes");
        let inserted = store.add_memory(mem.clone()).await.unwrap();
        assert!(inserted.id > 0);

        let found = store
            .find_by_hash(&content_hash("hello world", "manual:notes"))
            .await
            .unwrap()
            .expect("expected memory to be found by hash");
        assert_eq!(found.content, "hello world");
    }

    #[tokio::test]
    async fn duplicate_content_hash_is_classified_as_duplicate() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mem = sample_memory("dup", "manual:notes");
        store.add_memory(mem.clone()).await.unwrap();
        let err = store.add_memory(mem).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn fts_search_finds_inserted_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add_memory(sample_memory("the rocket launch went well", "manual:log"))
            .await
            .unwrap();
        store
            .add_memory(sample_memory("grocery list: milk, eggs", "manual:log2"))
            .await
            .unwrap();

        let hits = store.search_fts("rocket", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn deleting_memory_cascades_to_facts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mem = store
            .add_memory(sample_memory("content", "manual:a"))
            .await
            .unwrap();
        let fact = Fact {
            id: 0,
            memory_id: mem.id,
            subject: "s".into(),
            predicate: "p".into(),
            object: "o".into(),
            fact_type: FactType::Attribute,
            confidence: 0.9,
            decay_rate: 0.0,
            source_quote: String::new(),
            created_at: Utc::now(),
            last_reinforced_at: Utc::now(),
        };
        store.add_fact(fact).await.unwrap();
        assert_eq!(store.facts_for_memory(mem.id).await.unwrap().len(), 1);

        store.delete_memory(mem.id).await.unwrap();
        assert!(store.facts_for_memory(mem.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_inference_creates_supersedes_edge_for_changed_attribute() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mem = store
            .add_memory(sample_memory("content", "manual:a"))
            .await
            .unwrap();

        let base = Fact {
            id: 0,
            memory_id: mem.id,
            subject: "project_x".into(),
            predicate: "status".into(),
            object: "in_progress".into(),
            fact_type: FactType::State,
            confidence: 0.9,
            decay_rate: 0.0,
            source_quote: String::new(),
            created_at: Utc::now() - chrono::Duration::days(1),
            last_reinforced_at: Utc::now(),
        };
        let newer = Fact {
            object: "done".into(),
            created_at: Utc::now(),
            ..base.clone()
        };
        store.add_fact(base).await.unwrap();
        store.add_fact(newer).await.unwrap();

        let result = store
            .run_inference(InferenceOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.edges_created, 1);
        assert_eq!(store.count_edges_by_source("inferred").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_facts_returns_only_low_confidence_unreinforced_facts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mem = store.add_memory(sample_memory("content", "manual:a")).await.unwrap();

        let stale = Fact {
            id: 0,
            memory_id: mem.id,
            subject: "s".into(),
            predicate: "p".into(),
            object: "stale value".into(),
            fact_type: FactType::Attribute,
            confidence: 0.2,
            decay_rate: 0.01,
            source_quote: String::new(),
            created_at: Utc::now() - chrono::Duration::days(30),
            last_reinforced_at: Utc::now() - chrono::Duration::days(30),
        };
        let fresh = Fact {
            object: "fresh value".into(),
            confidence: 0.2,
            last_reinforced_at: Utc::now(),
            created_at: Utc::now(),
            ..stale.clone()
        };
        let confident = Fact {
            object: "confident value".into(),
            confidence: 0.9,
            last_reinforced_at: Utc::now() - chrono::Duration::days(30),
            created_at: Utc::now() - chrono::Duration::days(30),
            ..stale.clone()
        };
        store.add_fact(stale).await.unwrap();
        store.add_fact(fresh).await.unwrap();
        store.add_fact(confident).await.unwrap();

        let results = store.stale_facts(0.5, 7).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].object, "stale value");
    }

    #[tokio::test]
    async fn get_attribute_conflicts_limit_groups_facts_with_differing_objects() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mem = store.add_memory(sample_memory("content", "manual:a")).await.unwrap();

        let base = Fact {
            id: 0,
            memory_id: mem.id,
            subject: "project_x".into(),
            predicate: "owner".into(),
            object: "alice".into(),
            fact_type: FactType::Attribute,
            confidence: 0.9,
            decay_rate: 0.0,
            source_quote: String::new(),
            created_at: Utc::now() - chrono::Duration::days(1),
            last_reinforced_at: Utc::now(),
        };
        let conflicting = Fact { object: "bob".into(), created_at: Utc::now(), ..base.clone() };
        let agreeing = Fact {
            subject: "project_y".into(),
            predicate: "owner".into(),
            object: "carol".into(),
            ..base.clone()
        };
        store.add_fact(base).await.unwrap();
        store.add_fact(conflicting).await.unwrap();
        store.add_fact(agreeing).await.unwrap();

        let conflicts = store.get_attribute_conflicts_limit(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].subject, "project_x");
        assert_eq!(conflicts[0].predicate, "owner");
        assert_eq!(conflicts[0].facts.len(), 2);
    }
}
