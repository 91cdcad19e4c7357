//! SQLite Storage Implementation
//!
//! Persistent holder of contexts and their derived inverted indexes.
//! Single-writer, multi-reader: both connections sit behind a `Mutex`, and a
//! retrieval's candidate set is loaded inside one read transaction so later
//! writes are invisible to it.
//!
//! Every write goes through `put`, which normalizes (emotion, node dedup,
//! range clamps), derives rule conditions, validates every storage invariant
//! and installs the context plus its index rows atomically.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::collaborators::{embedding_from_bytes, embedding_to_bytes};
use crate::error::{EngineError, Invariant, Result};
use crate::memory::{
    derive_rule_conditions, Context, ContextDraft, ContextId, Edge, Emotion, NodeToken, Outcome,
    StoreStats, MAX_DESCRIPTION_LEN, MAX_LEVEL,
};
use crate::text;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Store-level tunables
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Merged node cap for L1+ contexts (node-accumulation bound)
    pub max_merged_nodes: usize,
    /// Jaccard threshold above which two same-level L1+ contexts are duplicates
    pub dedup_threshold: f64,
    /// Canonical entity set; rule conditions are confined to nodes plus this
    pub entities: Vec<String>,
    /// When set, a context id may appear in at most one other context's sources
    pub exclusive_sources: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_merged_nodes: 15,
            dedup_threshold: 0.6,
            entities: vec![],
            exclusive_sources: false,
        }
    }
}

// ============================================================================
// CONTEXT STORE
// ============================================================================

/// SQLite-backed context store
///
/// All methods take `&self`; writer and reader connections carry their own
/// locks, so callers can share the store behind an `Arc`.
pub struct ContextStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    config: StoreConfig,
}

impl ContextStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) a store. `None` resolves to the platform data
    /// directory.
    pub fn open(db_path: Option<PathBuf>, config: StoreConfig) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = directories::ProjectDirs::from("io", "contextwave", "core")
                    .ok_or_else(|| {
                        EngineError::Init("Could not determine project directories".to_string())
                    })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("contextwave.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            config,
        })
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngineError::Init("Writer lock poisoned".into()))
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Validate, normalize and atomically install a draft. Returns the
    /// assigned id. A rejected write leaves the store untouched.
    pub fn put(&self, draft: &ContextDraft, now: DateTime<Utc>) -> Result<ContextId> {
        // Normalization happens before any validation that depends on it
        let emotion = Emotion::normalize(&draft.emotion);
        let nodes = dedup_nodes(&draft.nodes);
        let node_names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let intensity = draft.intensity.clamp(0.0, 1.0);
        let certainty = draft.certainty.clamp(0.0, 1.0);

        if draft.level > MAX_LEVEL {
            return Err(EngineError::InvariantViolation(Invariant::LevelCap));
        }
        if draft.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::InvariantViolation(Invariant::DescriptionLength));
        }
        {
            let name_set: BTreeSet<&str> = node_names.iter().copied().collect();
            for edge in &draft.edges {
                if !name_set.contains(edge.source.as_str())
                    || !name_set.contains(edge.target.as_str())
                {
                    return Err(EngineError::InvariantViolation(Invariant::EdgeEndpoint));
                }
            }
        }
        if !draft.sources.is_empty() && draft.level == 0 {
            return Err(EngineError::InvariantViolation(Invariant::SourceOnEpisode));
        }
        if draft.level >= 1 && nodes.len() > self.config.max_merged_nodes {
            return Err(EngineError::InvariantViolation(Invariant::NodeCap));
        }

        let rule_conditions = match &draft.rule {
            Some(rule) => derive_rule_conditions(rule, &node_names, &self.config.entities),
            None => vec![],
        };

        let writer = self.lock_writer()?;

        // Source integrity: every source exists at a strictly lower level
        for source_id in &draft.sources {
            let source_level: Option<u8> = writer
                .query_row(
                    "SELECT level FROM contexts WHERE id = ?1",
                    params![source_id],
                    |row| row.get(0),
                )
                .optional()?;
            match source_level {
                Some(level) if level < draft.level => {}
                _ => return Err(EngineError::InvariantViolation(Invariant::SourceLevel)),
            }
            if self.config.exclusive_sources {
                let claimed: i64 = writer.query_row(
                    "SELECT COUNT(*) FROM context_sources WHERE source_id = ?1",
                    params![source_id],
                    |row| row.get(0),
                )?;
                if claimed > 0 {
                    return Err(EngineError::InvariantViolation(Invariant::SourceExclusivity));
                }
            }
        }

        // Caller-supplied dedup key
        if let Some(key) = &draft.dedup_key {
            let existing: Option<i64> = writer
                .query_row(
                    "SELECT id FROM contexts WHERE dedup_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(EngineError::Conflict(key.clone()));
            }
        }

        // Semantic dedup against same-level abstractions
        if draft.level >= 1 {
            let mut joined = draft.description.clone();
            if let Some(rule) = &draft.rule {
                joined.push(' ');
                joined.push_str(rule);
            }
            if let Some(dup) = find_duplicate_in(
                &writer,
                draft.level,
                &joined,
                self.config.dedup_threshold,
            )? {
                tracing::debug!("Semantic dedup hit against context {}", dup);
                return Err(EngineError::InvariantViolation(Invariant::SemanticDedup));
            }
        }

        // All checks passed: install atomically
        let tx = writer.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO contexts (
                description, emotion, intensity, result, rule, certainty,
                level, dedup_key, created_at, when_day, when_cycle
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                draft.description,
                emotion.as_str(),
                intensity,
                draft.result.as_str(),
                draft.rule,
                certainty,
                draft.level,
                draft.dedup_key,
                now,
                draft.when_day,
                draft.when_cycle,
            ],
        )?;
        let id = tx.last_insert_rowid();

        for (pos, node) in nodes.iter().enumerate() {
            tx.execute(
                "INSERT INTO context_nodes (context_id, pos, name, role) VALUES (?1, ?2, ?3, ?4)",
                params![id, pos as i64, node.name, node.role],
            )?;
        }
        for (pos, edge) in draft.edges.iter().enumerate() {
            tx.execute(
                "INSERT INTO context_edges (context_id, pos, source, target, relation)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, pos as i64, edge.source, edge.target, edge.relation],
            )?;
        }
        for token in &rule_conditions {
            tx.execute(
                "INSERT OR IGNORE INTO context_rule_conditions (context_id, token)
                 VALUES (?1, ?2)",
                params![id, token],
            )?;
        }
        for source_id in &draft.sources {
            tx.execute(
                "INSERT OR IGNORE INTO context_sources (context_id, source_id) VALUES (?1, ?2)",
                params![id, source_id],
            )?;
        }
        if let Some(embedding) = &draft.embedding {
            tx.execute(
                "INSERT INTO context_embeddings (context_id, embedding, dimensions, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, embedding_to_bytes(embedding), embedding.len() as i64, now],
            )?;
        }
        tx.commit()?;

        tracing::debug!(context_id = id, level = draft.level, "context stored");
        Ok(id)
    }

    /// Lazy embedding fill-in; the one structural-free mutation besides
    /// certainty updates.
    pub fn set_embedding(&self, id: ContextId, embedding: &[f32], now: DateTime<Utc>) -> Result<()> {
        let writer = self.lock_writer()?;
        self.ensure_exists(&writer, id)?;
        writer.execute(
            "INSERT OR REPLACE INTO context_embeddings
                 (context_id, embedding, dimensions, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, embedding_to_bytes(embedding), embedding.len() as i64, now],
        )?;
        Ok(())
    }

    /// Bounded certainty update (consolidation only); the value is clamped
    /// into [0,1].
    pub fn update_certainty(&self, id: ContextId, certainty: f64) -> Result<()> {
        let writer = self.lock_writer()?;
        self.ensure_exists(&writer, id)?;
        writer.execute(
            "UPDATE contexts SET certainty = ?1 WHERE id = ?2",
            params![certainty.clamp(0.0, 1.0), id],
        )?;
        Ok(())
    }

    fn ensure_exists(&self, conn: &Connection, id: ContextId) -> Result<()> {
        let found: Option<i64> = conn
            .query_row("SELECT id FROM contexts WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        found.map(|_| ()).ok_or(EngineError::NotFound(id))
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Fetch one context by id
    pub fn get(&self, id: ContextId) -> Result<Context> {
        let reader = self.lock_reader()?;
        let tx = reader.unchecked_transaction()?;
        let mut contexts = load_contexts(&tx, "WHERE c.id = ?1", params![id])?;
        tx.commit()?;
        contexts.pop().ok_or(EngineError::NotFound(id))
    }

    /// Every stored context with `level <= level_cap`, loaded inside a
    /// single read transaction: one consistent snapshot per retrieval.
    pub fn scan(&self, level_cap: u8) -> Result<Vec<Context>> {
        let reader = self.lock_reader()?;
        let tx = reader.unchecked_transaction()?;
        let contexts = load_contexts(&tx, "WHERE c.level <= ?1", params![level_cap])?;
        tx.commit()?;
        Ok(contexts)
    }

    /// Contexts at `level` not yet referenced from any context's sources -
    /// the consolidator's unconsolidated set.
    pub fn unconsolidated(&self, level: u8) -> Result<Vec<Context>> {
        let reader = self.lock_reader()?;
        let tx = reader.unchecked_transaction()?;
        let contexts = load_contexts(
            &tx,
            "WHERE c.level = ?1
               AND c.id NOT IN (SELECT source_id FROM context_sources)",
            params![level],
        )?;
        tx.commit()?;
        Ok(contexts)
    }

    /// Remove every context matching the predicate, cascading through the
    /// index tables. Refuses the whole call when a matching context is still
    /// referenced from a surviving context's sources.
    pub fn purge<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&Context) -> bool,
    {
        let all = self.scan(MAX_LEVEL)?;
        let doomed: Vec<ContextId> = all
            .iter()
            .filter(|ctx| predicate(ctx))
            .map(|ctx| ctx.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let doomed_set: BTreeSet<ContextId> = doomed.iter().copied().collect();
        for ctx in &all {
            if doomed_set.contains(&ctx.id) {
                continue;
            }
            if ctx.sources.iter().any(|s| doomed_set.contains(s)) {
                return Err(EngineError::InvariantViolation(Invariant::PurgeReferenced));
            }
        }

        let writer = self.lock_writer()?;
        let tx = writer.unchecked_transaction()?;
        let mut removed = 0usize;
        // Higher levels reference lower ones and carry larger ids; deleting
        // newest-first keeps the source foreign key satisfied throughout
        for id in doomed.iter().rev() {
            removed += tx.execute("DELETE FROM contexts WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        tracing::info!(removed, "purged contexts");
        Ok(removed)
    }

    // ========================================================================
    // INVERTED-INDEX READS
    // ========================================================================

    /// Ids of contexts holding the given node name
    pub fn ids_with_node(&self, name: &str) -> Result<Vec<ContextId>> {
        self.index_lookup(
            "SELECT DISTINCT context_id FROM context_nodes WHERE name = ?1 ORDER BY context_id",
            name,
        )
    }

    /// Ids of contexts holding an edge with the given relation label
    pub fn ids_with_relation(&self, relation: &str) -> Result<Vec<ContextId>> {
        self.index_lookup(
            "SELECT DISTINCT context_id FROM context_edges WHERE relation = ?1 ORDER BY context_id",
            relation,
        )
    }

    /// Ids of contexts with the given emotion
    pub fn ids_with_emotion(&self, emotion: Emotion) -> Result<Vec<ContextId>> {
        self.index_lookup(
            "SELECT id FROM contexts WHERE emotion = ?1 ORDER BY id",
            emotion.as_str(),
        )
    }

    /// Ids of contexts with the given result
    pub fn ids_with_result(&self, result: Outcome) -> Result<Vec<ContextId>> {
        self.index_lookup(
            "SELECT id FROM contexts WHERE result = ?1 ORDER BY id",
            result.as_str(),
        )
    }

    /// Ids of contexts whose rule conditions contain the given token
    pub fn ids_with_rule_condition(&self, token: &str) -> Result<Vec<ContextId>> {
        self.index_lookup(
            "SELECT DISTINCT context_id FROM context_rule_conditions
             WHERE token = ?1 ORDER BY context_id",
            token,
        )
    }

    fn index_lookup(&self, sql: &str, value: &str) -> Result<Vec<ContextId>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(sql)?;
        let ids = stmt
            .query_map(params![value], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<ContextId>>>()?;
        Ok(ids)
    }

    /// Find an existing same-level context whose `rule + description` token
    /// set overlaps `text` above the dedup threshold. Used by the write path
    /// and by the consolidator's absorption bookkeeping.
    pub fn find_duplicate(&self, level: u8, joined_text: &str) -> Result<Option<ContextId>> {
        let reader = self.lock_reader()?;
        find_duplicate_in(&reader, level, joined_text, self.config.dedup_threshold)
    }

    // ========================================================================
    // STATISTICS
    // ========================================================================

    /// Operational statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let reader = self.lock_reader()?;
        let mut stats = StoreStats::default();

        stats.total_contexts =
            reader.query_row("SELECT COUNT(*) FROM contexts", [], |row| row.get(0))?;
        for level in 0..=MAX_LEVEL {
            stats.per_level[level as usize] = reader.query_row(
                "SELECT COUNT(*) FROM contexts WHERE level = ?1",
                params![level],
                |row| row.get(0),
            )?;
            stats.unconsolidated_per_level[level as usize] = reader.query_row(
                "SELECT COUNT(*) FROM contexts
                 WHERE level = ?1
                   AND id NOT IN (SELECT source_id FROM context_sources)",
                params![level],
                |row| row.get(0),
            )?;
        }
        stats.with_embedding =
            reader.query_row("SELECT COUNT(*) FROM context_embeddings", [], |row| {
                row.get(0)
            })?;
        stats.oldest = reader.query_row(
            "SELECT MIN(created_at) FROM contexts",
            [],
            |row| row.get::<_, Option<DateTime<Utc>>>(0),
        )?;
        stats.newest = reader.query_row(
            "SELECT MAX(created_at) FROM contexts",
            [],
            |row| row.get::<_, Option<DateTime<Utc>>>(0),
        )?;
        Ok(stats)
    }

    // ========================================================================
    // CONSOLIDATION BOOKKEEPING
    // ========================================================================

    /// Record one generalizer failure for a cluster signature; flips the
    /// quarantine flag once `quarantine_after` consecutive failures accrue.
    /// Returns the updated failure count.
    pub fn record_failure(
        &self,
        signature: &str,
        error: &str,
        quarantine_after: u32,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT INTO consolidation_failures (signature, failures, quarantined, last_error, updated_at)
             VALUES (?1, 1, 0, ?2, ?3)
             ON CONFLICT(signature) DO UPDATE SET
                 failures = failures + 1,
                 last_error = excluded.last_error,
                 updated_at = excluded.updated_at",
            params![signature, error, now],
        )?;
        let failures: u32 = writer.query_row(
            "SELECT failures FROM consolidation_failures WHERE signature = ?1",
            params![signature],
            |row| row.get(0),
        )?;
        if failures >= quarantine_after {
            writer.execute(
                "UPDATE consolidation_failures SET quarantined = 1 WHERE signature = ?1",
                params![signature],
            )?;
        }
        Ok(failures)
    }

    /// Whether a cluster signature is quarantined
    pub fn is_quarantined(&self, signature: &str) -> Result<bool> {
        let reader = self.lock_reader()?;
        let quarantined: Option<i64> = reader
            .query_row(
                "SELECT quarantined FROM consolidation_failures WHERE signature = ?1",
                params![signature],
                |row| row.get(0),
            )
            .optional()?;
        Ok(quarantined.unwrap_or(0) != 0)
    }

    /// Drop failure bookkeeping for a signature (cluster succeeded or its
    /// contents changed)
    pub fn clear_failures(&self, signature: &str) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "DELETE FROM consolidation_failures WHERE signature = ?1",
            params![signature],
        )?;
        Ok(())
    }

    /// Remember that a cluster was absorbed into an existing abstraction
    pub fn record_absorption(
        &self,
        signature: &str,
        absorbed_into: ContextId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO consolidation_absorptions (signature, absorbed_into, created_at)
             VALUES (?1, ?2, ?3)",
            params![signature, absorbed_into, now],
        )?;
        Ok(())
    }

    /// The id a previously-absorbed cluster signature resolved to, if any
    pub fn absorption_for(&self, signature: &str) -> Result<Option<ContextId>> {
        let reader = self.lock_reader()?;
        let id = reader
            .query_row(
                "SELECT absorbed_into FROM consolidation_absorptions WHERE signature = ?1",
                params![signature],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

// ============================================================================
// ROW ASSEMBLY
// ============================================================================

/// Keep the first occurrence of each node name
fn dedup_nodes(nodes: &[NodeToken]) -> Vec<NodeToken> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    nodes
        .iter()
        .filter(|n| seen.insert(n.name.as_str()))
        .cloned()
        .collect()
}

fn find_duplicate_in(
    conn: &Connection,
    level: u8,
    joined_text: &str,
    threshold: f64,
) -> Result<Option<ContextId>> {
    let candidate_tokens = text::token_set(joined_text);
    let mut stmt = conn.prepare(
        "SELECT id, description, COALESCE(rule, '') FROM contexts WHERE level = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![level], |row| {
        Ok((
            row.get::<_, ContextId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (id, description, rule) = row?;
        let existing = text::token_set(&format!("{} {}", description, rule));
        if text::jaccard(&candidate_tokens, &existing) > threshold {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Load contexts matching a WHERE fragment over alias `c`, with all child
/// rows, inside the caller's transaction.
fn load_contexts(
    tx: &rusqlite::Transaction<'_>,
    where_clause: &str,
    filter: impl rusqlite::Params + Copy,
) -> Result<Vec<Context>> {
    let sql = format!(
        "SELECT c.id, c.description, c.emotion, c.intensity, c.result, c.rule,
                c.certainty, c.level, c.created_at, c.when_day, c.when_cycle
         FROM contexts c {} ORDER BY c.id",
        where_clause
    );
    let mut stmt = tx.prepare(&sql)?;
    let mut contexts: Vec<Context> = stmt
        .query_map(filter, |row| {
            Ok(Context {
                id: row.get(0)?,
                description: row.get(1)?,
                emotion: Emotion::normalize(&row.get::<_, String>(2)?),
                intensity: row.get(3)?,
                result: Outcome::parse_name(&row.get::<_, String>(4)?),
                rule: row.get(5)?,
                certainty: row.get(6)?,
                level: row.get(7)?,
                created_at: row.get(8)?,
                when_day: row.get(9)?,
                when_cycle: row.get(10)?,
                nodes: vec![],
                edges: vec![],
                rule_conditions: vec![],
                sources: vec![],
                embedding: None,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    if contexts.is_empty() {
        return Ok(contexts);
    }
    let mut slots: HashMap<ContextId, usize> = HashMap::with_capacity(contexts.len());
    for (i, ctx) in contexts.iter().enumerate() {
        slots.insert(ctx.id, i);
    }

    let sql = format!(
        "SELECT n.context_id, n.name, n.role
         FROM context_nodes n JOIN contexts c ON c.id = n.context_id
         {} ORDER BY n.context_id, n.pos",
        where_clause
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(filter, |row| {
        Ok((
            row.get::<_, ContextId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;
    for row in rows {
        let (id, name, role) = row?;
        if let Some(&slot) = slots.get(&id) {
            contexts[slot].nodes.push(NodeToken { name, role });
        }
    }

    let sql = format!(
        "SELECT e.context_id, e.source, e.target, e.relation
         FROM context_edges e JOIN contexts c ON c.id = e.context_id
         {} ORDER BY e.context_id, e.pos",
        where_clause
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(filter, |row| {
        Ok((
            row.get::<_, ContextId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    for row in rows {
        let (id, source, target, relation) = row?;
        if let Some(&slot) = slots.get(&id) {
            contexts[slot].edges.push(Edge {
                source,
                target,
                relation,
            });
        }
    }

    let sql = format!(
        "SELECT r.context_id, r.token
         FROM context_rule_conditions r JOIN contexts c ON c.id = r.context_id
         {} ORDER BY r.context_id, r.token",
        where_clause
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(filter, |row| {
        Ok((row.get::<_, ContextId>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (id, token) = row?;
        if let Some(&slot) = slots.get(&id) {
            contexts[slot].rule_conditions.push(token);
        }
    }

    let sql = format!(
        "SELECT s.context_id, s.source_id
         FROM context_sources s JOIN contexts c ON c.id = s.context_id
         {} ORDER BY s.context_id, s.source_id",
        where_clause
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(filter, |row| {
        Ok((row.get::<_, ContextId>(0)?, row.get::<_, ContextId>(1)?))
    })?;
    for row in rows {
        let (id, source_id) = row?;
        if let Some(&slot) = slots.get(&id) {
            contexts[slot].sources.push(source_id);
        }
    }

    let sql = format!(
        "SELECT e.context_id, e.embedding
         FROM context_embeddings e JOIN contexts c ON c.id = e.context_id
         {}",
        where_clause
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(filter, |row| {
        Ok((row.get::<_, ContextId>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (id, bytes) = row?;
        if let Some(&slot) = slots.get(&id) {
            contexts[slot].embedding = embedding_from_bytes(&bytes);
        }
    }

    Ok(contexts)
}

// ============================================================================
// TESTS
// ============================================================================
