//! Schema definition and bootstrap. Rebuilding the FTS index from
//! `memories` is always safe — it is a derived, content-linked table.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    content         TEXT NOT NULL,
    source_file     TEXT NOT NULL,
    source_section  TEXT,
    source_line     INTEGER,
    content_hash    TEXT NOT NULL UNIQUE,
    project         TEXT,
    memory_class    TEXT NOT NULL DEFAULT '',
    metadata        TEXT,
    imported_at     TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_source_file ON memories(source_file);
CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    content='memories',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO memories_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TABLE IF NOT EXISTS facts (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id           INTEGER NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    subject             TEXT NOT NULL,
    predicate           TEXT NOT NULL,
    object              TEXT NOT NULL,
    fact_type           TEXT NOT NULL,
    confidence          REAL NOT NULL,
    decay_rate          REAL NOT NULL DEFAULT 0,
    source_quote        TEXT NOT NULL DEFAULT '',
    created_at          TEXT NOT NULL,
    last_reinforced_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facts_memory_id ON facts(memory_id);
CREATE INDEX IF NOT EXISTS idx_facts_subject_predicate ON facts(subject, predicate);

CREATE TABLE IF NOT EXISTS edges (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    source_fact_id  INTEGER NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
    target_fact_id  INTEGER NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
    relation        TEXT NOT NULL,
    source          TEXT NOT NULL,
    score           REAL NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    UNIQUE(source_fact_id, target_fact_id, relation)
);

CREATE TABLE IF NOT EXISTS embeddings (
    memory_id   INTEGER PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    vector      BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS connectors (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    provider            TEXT NOT NULL UNIQUE,
    config              TEXT NOT NULL,
    enabled             INTEGER NOT NULL DEFAULT 1,
    last_sync_at        TEXT,
    last_error          TEXT NOT NULL DEFAULT '',
    records_imported    INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
"#;

pub fn apply(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA)
}
