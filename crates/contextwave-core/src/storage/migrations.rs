//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: contexts, inverted indexes, embeddings",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Consolidation bookkeeping: failures/quarantine, absorptions",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: contexts plus the derived inverted-index tables. Each index table
/// cascades on context deletion so purge stays a single DELETE.
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);
INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'));

CREATE TABLE IF NOT EXISTS contexts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    emotion TEXT NOT NULL DEFAULT 'neutral',
    intensity REAL NOT NULL DEFAULT 0.0,
    result TEXT NOT NULL DEFAULT 'neutral',
    rule TEXT,
    certainty REAL NOT NULL DEFAULT 1.0,
    level INTEGER NOT NULL DEFAULT 0 CHECK (level BETWEEN 0 AND 2),
    dedup_key TEXT UNIQUE,
    created_at TEXT NOT NULL,
    when_day INTEGER,
    when_cycle INTEGER
);

CREATE INDEX IF NOT EXISTS idx_contexts_level ON contexts(level);
CREATE INDEX IF NOT EXISTS idx_contexts_emotion ON contexts(emotion);
CREATE INDEX IF NOT EXISTS idx_contexts_result ON contexts(result);
CREATE INDEX IF NOT EXISTS idx_contexts_created ON contexts(created_at);

-- Inverted index: node name -> context
CREATE TABLE IF NOT EXISTS context_nodes (
    context_id INTEGER NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    pos INTEGER NOT NULL,
    name TEXT NOT NULL,
    role TEXT,
    PRIMARY KEY (context_id, pos)
);
CREATE INDEX IF NOT EXISTS idx_context_nodes_name ON context_nodes(name);

-- Inverted index: relation label -> context
CREATE TABLE IF NOT EXISTS context_edges (
    context_id INTEGER NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    pos INTEGER NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    relation TEXT NOT NULL,
    PRIMARY KEY (context_id, pos)
);
CREATE INDEX IF NOT EXISTS idx_context_edges_relation ON context_edges(relation);

-- Inverted index: rule-condition token -> context
CREATE TABLE IF NOT EXISTS context_rule_conditions (
    context_id INTEGER NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    token TEXT NOT NULL,
    PRIMARY KEY (context_id, token)
);
CREATE INDEX IF NOT EXISTS idx_context_rule_conditions_token
    ON context_rule_conditions(token);

-- Consolidation lineage; source rows are never cascaded away implicitly
CREATE TABLE IF NOT EXISTS context_sources (
    context_id INTEGER NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    source_id INTEGER NOT NULL REFERENCES contexts(id),
    PRIMARY KEY (context_id, source_id)
);
CREATE INDEX IF NOT EXISTS idx_context_sources_source ON context_sources(source_id);

-- Embeddings storage (binary blob, little-endian f32)
CREATE TABLE IF NOT EXISTS context_embeddings (
    context_id INTEGER PRIMARY KEY REFERENCES contexts(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL DEFAULT 384,
    created_at TEXT NOT NULL
);
"#;

/// V2: per-cluster failure counts with quarantine, and the absorption record
/// that lets a later pass skip the generalizer for an unchanged cluster.
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS consolidation_failures (
    signature TEXT PRIMARY KEY,
    failures INTEGER NOT NULL DEFAULT 0,
    quarantined INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS consolidation_absorptions (
    signature TEXT PRIMARY KEY,
    absorbed_into INTEGER NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================
