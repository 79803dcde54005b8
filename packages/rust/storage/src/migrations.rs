//! SQL migration definitions for the Harvester database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: units, catalog, chunks, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Registered work units
CREATE TABLE IF NOT EXISTS units (
    name       TEXT PRIMARY KEY,
    origin     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Per-identifier stage ledger (discovered / retrieved / indexed)
CREATE TABLE IF NOT EXISTS catalog (
    id            TEXT PRIMARY KEY,
    stage         TEXT NOT NULL,
    identifier    TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    recorded_at   TEXT NOT NULL,
    UNIQUE(stage, identifier)
);

CREATE INDEX IF NOT EXISTS idx_catalog_identifier ON catalog(identifier);

-- Indexed content chunks
CREATE TABLE IF NOT EXISTS chunks (
    id           TEXT PRIMARY KEY,
    identifier   TEXT NOT NULL,
    seq          INTEGER NOT NULL,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(identifier, seq)
);

CREATE INDEX IF NOT EXISTS idx_chunks_identifier ON chunks(identifier);

-- Run history
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    report_json TEXT
);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
