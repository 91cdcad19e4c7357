//! Wave Engine
//!
//! The narrow surface callers see: `write`, `get`, `build_signal`,
//! `retrieve`, `consolidate`, `purge`, `stats`. The engine owns the store
//! and the injected collaborators, bulk-scores immutable snapshots, and
//! degrades gracefully when a collaborator misbehaves - a failed embedder
//! only costs the semantic channel.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::collaborators::{Clock, CollaboratorError, Embedder, Generalizer, SystemClock};
use crate::consolidation::{ConsolidationBudget, ConsolidationConfig, ConsolidationStats, Consolidator};
use crate::error::{EngineError, Result};
use crate::memory::{Context, ContextDraft, ContextId, StoreStats, MAX_LEVEL};
use crate::resonance::{score_context, ScorerConfig};
use crate::retrieval::{DiversitySelector, RetrievalOptions, ScoredContext};
use crate::signal::{SignalBuilder, SignalConfig, Situation, WaveSignal};
use crate::storage::{ContextStore, StoreConfig};

/// How many candidates are scored between cancellation checks
const CANCEL_CHECK_STRIDE: usize = 256;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Engine-wide configuration, one section per component
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Store tunables (node cap, dedup threshold, entity set)
    pub store: StoreConfig,
    /// Signal construction tunables
    pub signal: SignalConfig,
    /// Scorer tunables
    pub scorer: ScorerConfig,
    /// Default retrieval options; callers may override per call
    pub retrieval: RetrievalOptions,
    /// Consolidation tunables
    pub consolidation: ConsolidationConfig,
    /// Per-call embedder deadline
    pub embedder_deadline: Duration,
    /// Situation-text embedding cache entries
    pub embedding_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            signal: SignalConfig::default(),
            scorer: ScorerConfig::default(),
            retrieval: RetrievalOptions::default(),
            consolidation: ConsolidationConfig::default(),
            embedder_deadline: Duration::from_secs(10),
            embedding_cache_size: 100,
        }
    }
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// What kind of degradation a diagnostic records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IncidentKind {
    /// A collaborator call failed; the operation continued without it
    CollaboratorFailure,
    /// A collaborator call overran its deadline
    CollaboratorTimeout,
    /// A candidate referenced a source missing from the snapshot
    StaleSnapshot,
}

/// A recoverable degradation observed during an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Degradation class
    pub kind: IncidentKind,
    /// Human-readable detail
    pub detail: String,
}

// ============================================================================
// WAVE ENGINE
// ============================================================================

/// The context-wave memory engine
///
/// All methods take `&self`; the store carries its own locks, so the engine
/// can sit behind an `Arc` and serve concurrent retrievals while a single
/// writer (or the consolidator) proceeds through `put`.
pub struct WaveEngine {
    store: ContextStore,
    signal_builder: SignalBuilder,
    selector: DiversitySelector,
    clock: Arc<dyn Clock>,
    embedder: Option<Arc<dyn Embedder>>,
    generalizer: Option<Arc<dyn Generalizer>>,
    embedding_cache: Mutex<LruCache<String, Vec<f32>>>,
    scorer: ScorerConfig,
    retrieval_defaults: RetrievalOptions,
    consolidation: ConsolidationConfig,
    embedder_deadline: Duration,
}

impl WaveEngine {
    /// Open an engine over a database path (`None` resolves to the platform
    /// data directory). Collaborators start absent; attach them with the
    /// `with_*` builders.
    pub fn open(db_path: Option<PathBuf>, config: EngineConfig) -> Result<Self> {
        let cache_size = NonZeroUsize::new(config.embedding_cache_size.max(1))
            .ok_or_else(|| EngineError::Init("Embedding cache size must be positive".into()))?;
        Ok(Self {
            store: ContextStore::open(db_path, config.store)?,
            signal_builder: SignalBuilder::with_config(config.signal),
            selector: DiversitySelector,
            clock: Arc::new(SystemClock),
            embedder: None,
            generalizer: None,
            embedding_cache: Mutex::new(LruCache::new(cache_size)),
            scorer: config.scorer,
            retrieval_defaults: config.retrieval,
            consolidation: config.consolidation,
            embedder_deadline: config.embedder_deadline,
        })
    }

    /// Replace the clock (tests inject a fixed one)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an embedder
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach a generalizer
    pub fn with_generalizer(mut self, generalizer: Arc<dyn Generalizer>) -> Self {
        self.generalizer = Some(generalizer);
        self
    }

    /// Direct store access for operational tooling
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Validate and persist a draft. When the draft carries no embedding and
    /// an embedder is attached, one is generated from the description; an
    /// embedder problem costs only the embedding, never the write.
    pub fn write(&self, draft: &ContextDraft) -> Result<ContextId> {
        let mut draft = draft.clone();
        if draft.embedding.is_none() && !draft.description.is_empty() {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(
                    &draft.description,
                    self.embedder_deadline,
                    &CancellationToken::new(),
                ) {
                    Ok(vector) => draft.embedding = Some(vector),
                    Err(e) => {
                        tracing::warn!(error = %e, "embedder unavailable at write time, storing without embedding");
                    }
                }
            }
        }
        self.store.put(&draft, self.clock.now())
    }

    /// Fetch one context
    pub fn get(&self, id: ContextId) -> Result<Context> {
        self.store.get(id)
    }

    /// Remove contexts matching the predicate; see the store for the
    /// referenced-source refusal
    pub fn purge<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&Context) -> bool,
    {
        self.store.purge(predicate)
    }

    /// Embed stored contexts that still lack vectors, oldest first, at most
    /// `limit` per call. Returns how many were filled in.
    pub fn backfill_embeddings(&self, limit: usize, cancel: &CancellationToken) -> Result<usize> {
        let embedder = match &self.embedder {
            Some(embedder) => embedder,
            None => return Ok(0),
        };
        let mut filled = 0;
        for ctx in self.store.scan(MAX_LEVEL)? {
            if filled >= limit {
                break;
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if ctx.embedding.is_some() || ctx.description.is_empty() {
                continue;
            }
            match embedder.embed(&ctx.description, self.embedder_deadline, cancel) {
                Ok(vector) => {
                    self.store.set_embedding(ctx.id, &vector, self.clock.now())?;
                    filled += 1;
                }
                Err(CollaboratorError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    tracing::warn!(context_id = ctx.id, error = %e, "embedding backfill failed");
                }
            }
        }
        Ok(filled)
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Build the canonical signal for a situation and, when an embedder is
    /// attached, an embedding of the situation text. Collaborator problems
    /// surface as diagnostics, never as errors: the retrieval just runs with
    /// the semantic channel inactive.
    pub fn build_signal(
        &self,
        situation: &Situation,
        cancel: &CancellationToken,
    ) -> (WaveSignal, Vec<Incident>) {
        let mut signal = self.signal_builder.build(situation);
        let mut incidents = Vec::new();

        let joined = situation
            .focus
            .iter()
            .chain(situation.text.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if joined.is_empty() {
            return (signal, incidents);
        }

        if let Some(embedder) = &self.embedder {
            if let Some(cached) = self.cached_embedding(&joined) {
                signal.embedding = Some(cached);
                return (signal, incidents);
            }
            match embedder.embed(&joined, self.embedder_deadline, cancel) {
                Ok(vector) => {
                    self.cache_embedding(&joined, vector.clone());
                    signal.embedding = Some(vector);
                }
                Err(CollaboratorError::Timeout(deadline)) => {
                    tracing::warn!(?deadline, "embedder timed out, semantic channel inactive");
                    incidents.push(Incident {
                        kind: IncidentKind::CollaboratorTimeout,
                        detail: format!("embedder timed out after {:?}", deadline),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedder failed, semantic channel inactive");
                    incidents.push(Incident {
                        kind: IncidentKind::CollaboratorFailure,
                        detail: e.to_string(),
                    });
                }
            }
        }
        (signal, incidents)
    }

    fn cached_embedding(&self, text: &str) -> Option<Vec<f32>> {
        self.embedding_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(text).cloned())
    }

    fn cache_embedding(&self, text: &str, vector: Vec<f32>) {
        if let Ok(mut cache) = self.embedding_cache.lock() {
            cache.put(text.to_string(), vector);
        }
    }

    /// Retrieve the working-memory slate for a signal: bulk-score one
    /// immutable snapshot, then select. Deterministic for a fixed snapshot
    /// and signal; writes landing during the retrieval are invisible to it.
    pub fn retrieve(
        &self,
        signal: &WaveSignal,
        k: usize,
        options: Option<RetrievalOptions>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredContext>> {
        let options = options.unwrap_or_else(|| self.retrieval_defaults.clone());
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let snapshot = self.store.scan(signal.max_level.min(MAX_LEVEL))?;
        let snapshot_ids: std::collections::BTreeSet<ContextId> =
            snapshot.iter().map(|c| c.id).collect();
        let now = self.clock.now();

        let mut scored: Vec<ScoredContext> = Vec::with_capacity(snapshot.len());
        for (i, ctx) in snapshot.into_iter().enumerate() {
            if i % CANCEL_CHECK_STRIDE == 0 && cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            // Defensive: a candidate whose lineage left the snapshot is
            // ignored, the selector continues
            if let Some(&missing) = ctx.sources.iter().find(|s| !snapshot_ids.contains(s)) {
                tracing::warn!(
                    context_id = ctx.id,
                    source = missing,
                    "stale snapshot: candidate skipped"
                );
                continue;
            }
            let (resonance, breakdown) = score_context(signal, &ctx, now, &self.scorer);
            scored.push(ScoredContext {
                context: ctx,
                resonance,
                breakdown,
            });
        }

        // Pre-selector truncation to the configured candidate width
        scored.sort_by(|a, b| {
            b.resonance
                .partial_cmp(&a.resonance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.context.created_at.cmp(&a.context.created_at))
                .then(a.context.id.cmp(&b.context.id))
        });
        scored.truncate(options.k_candidates);

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(self.selector.select(scored, k, &options))
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Run one consolidation pass. Idempotent when invoked twice in
    /// succession without interleaving writes.
    pub fn consolidate(
        &self,
        budget: &ConsolidationBudget,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationStats> {
        let generalizer = self
            .generalizer
            .as_ref()
            .ok_or_else(|| EngineError::Init("No generalizer attached".to_string()))?;
        Consolidator::new(
            &self.store,
            generalizer.as_ref(),
            self.clock.as_ref(),
            &self.consolidation,
        )
        .run(budget, cancel)
    }

    /// Operational statistics
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }
}

// ============================================================================
// TESTS
// ============================================================================
