//! Memory Consolidation
//!
//! The off-line pass. Gathers unconsolidated contexts level by level,
//! clusters them by node overlap, asks the external generalizer for an
//! abstraction draft per cluster, dedups it against existing same-level
//! abstractions, and writes survivors one level up through the normal write
//! path. Writes happen only at the end of a cluster and are atomic per
//! cluster, so cancellation never leaves dangling sources.
//!
//! Bookkeeping makes the pass cheap to repeat: consolidated members drop out
//! of the unconsolidated set, absorbed cluster signatures skip the
//! generalizer, and three consecutive failures quarantine a signature until
//! its membership changes.

mod cluster;

pub use cluster::{cluster_by_node_overlap, ClusterParams};

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::collaborators::{Clock, ClusterSummary, CollaboratorError, Generalizer};
use crate::error::{EngineError, Invariant, Result};
use crate::memory::{Context, ContextDraft, NodeToken, Outcome, MAX_LEVEL};
use crate::storage::ContextStore;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Consolidation tunables
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Clustering parameters
    pub cluster: ClusterParams,
    /// Intensity ceiling for generalizer output
    pub max_intensity: f64,
    /// Default certainty for written L1 contexts
    pub certainty_l1: f64,
    /// Default certainty for written L2 contexts
    pub certainty_l2: f64,
    /// Consecutive failures before a cluster signature is quarantined
    pub quarantine_after: u32,
    /// Per-call generalizer deadline
    pub generalizer_deadline: Duration,
    /// Factor applied to member certainty once their teaching is absorbed
    pub member_certainty_factor: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterParams::default(),
            max_intensity: 0.8,
            certainty_l1: 0.6,
            certainty_l2: 0.5,
            quarantine_after: 3,
            generalizer_deadline: Duration::from_secs(60),
            member_certainty_factor: 0.95,
        }
    }
}

/// Per-pass budget. A pass that runs out returns partial stats and the next
/// invocation resumes where the unconsolidated set says it should.
#[derive(Debug, Clone, Default)]
pub struct ConsolidationBudget {
    /// Maximum clusters handed to the generalizer in this pass
    pub max_clusters: Option<usize>,
    /// Wall-clock bound for the pass
    pub max_duration: Option<Duration>,
}

impl ConsolidationBudget {
    /// No bounds: consume the whole unconsolidated set
    pub fn unbounded() -> Self {
        Self::default()
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Result of one consolidation pass
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationStats {
    /// Clusters examined (including quarantined and previously absorbed)
    pub clusters_seen: i64,
    /// New abstractions written
    pub contexts_written: i64,
    /// Clusters absorbed into an existing abstraction
    pub contexts_absorbed: i64,
    /// Generalizer failures (cluster left unconsolidated)
    pub failures: i64,
    /// Clusters skipped because their signature is quarantined
    pub quarantined_skipped: i64,
    /// Whether the budget ran out before the pass finished
    pub budget_exhausted: bool,
    /// Processing duration in milliseconds
    pub duration_ms: i64,
}

// ============================================================================
// CONSOLIDATOR
// ============================================================================

/// One consolidation pass over a store
pub struct Consolidator<'a> {
    store: &'a ContextStore,
    generalizer: &'a dyn Generalizer,
    clock: &'a dyn Clock,
    config: &'a ConsolidationConfig,
}

impl<'a> Consolidator<'a> {
    /// Bind a pass to its collaborators
    pub fn new(
        store: &'a ContextStore,
        generalizer: &'a dyn Generalizer,
        clock: &'a dyn Clock,
        config: &'a ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            generalizer,
            clock,
            config,
        }
    }

    /// Run the pass. Completed clusters stay written on cancellation; the
    /// cluster in flight is discarded whole.
    pub fn run(
        &self,
        budget: &ConsolidationBudget,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationStats> {
        let started = Instant::now();
        let mut stats = ConsolidationStats::default();

        let outcome = self.run_levels(budget, cancel, started, &mut stats);
        stats.duration_ms = started.elapsed().as_millis() as i64;
        match outcome {
            Ok(()) => Ok(stats),
            Err(EngineError::BudgetExhausted) => {
                stats.budget_exhausted = true;
                tracing::info!(
                    clusters_seen = stats.clusters_seen,
                    "consolidation budget exhausted, returning partial stats"
                );
                Ok(stats)
            }
            Err(e) => Err(e),
        }
    }

    fn run_levels(
        &self,
        budget: &ConsolidationBudget,
        cancel: &CancellationToken,
        started: Instant,
        stats: &mut ConsolidationStats,
    ) -> Result<()> {
        for level in 0..MAX_LEVEL {
            let unconsolidated = self.store.unconsolidated(level)?;
            let clusters = cluster_by_node_overlap(&unconsolidated, &self.config.cluster);
            tracing::debug!(
                level,
                unconsolidated = unconsolidated.len(),
                clusters = clusters.len(),
                "consolidation scan"
            );
            for member_indices in clusters {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                check_budget(budget, started, stats)?;
                stats.clusters_seen += 1;

                let members: Vec<&Context> =
                    member_indices.iter().map(|&i| &unconsolidated[i]).collect();
                self.consolidate_cluster(level, &members, cancel, stats)?;
            }
        }
        Ok(())
    }

    fn consolidate_cluster(
        &self,
        level: u8,
        members: &[&Context],
        cancel: &CancellationToken,
        stats: &mut ConsolidationStats,
    ) -> Result<()> {
        let signature = cluster_signature(members);
        let target_level = level + 1;

        if self.store.is_quarantined(&signature)? {
            stats.quarantined_skipped += 1;
            tracing::debug!(%signature, "skipping quarantined cluster");
            return Ok(());
        }
        // A cluster absorbed before, with unchanged membership, needs no
        // second generalizer call
        if self.store.absorption_for(&signature)?.is_some() {
            stats.contexts_absorbed += 1;
            return Ok(());
        }

        let summary = summarize(target_level, members);
        let draft = match self.generalizer.generalize(
            &summary,
            self.config.generalizer_deadline,
            cancel,
        ) {
            Ok(draft) => draft,
            Err(CollaboratorError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                stats.failures += 1;
                let failures = self.store.record_failure(
                    &signature,
                    &e.to_string(),
                    self.config.quarantine_after,
                    self.clock.now(),
                )?;
                tracing::warn!(%signature, failures, error = %e, "generalizer failed, cluster left unconsolidated");
                return Ok(());
            }
        };

        // Merged nodes stay within the accumulation bound; edges must keep
        // both endpoints after the cut
        let mut node_names: Vec<String> = Vec::new();
        for name in &draft.nodes {
            if !node_names.contains(name) {
                node_names.push(name.clone());
            }
        }
        node_names.truncate(self.store.config().max_merged_nodes);
        let edges: Vec<_> = draft
            .edges
            .iter()
            .filter(|e| node_names.contains(&e.source) && node_names.contains(&e.target))
            .cloned()
            .collect();

        let default_certainty = if target_level >= 2 {
            self.config.certainty_l2
        } else {
            self.config.certainty_l1
        };
        let context_draft = ContextDraft {
            description: draft.description.clone(),
            nodes: node_names.iter().map(NodeToken::bare).collect(),
            edges,
            emotion: draft.emotion.clone(),
            intensity: draft.intensity.min(self.config.max_intensity),
            result: merged_result(members),
            rule: Some(draft.rule.clone()),
            certainty: draft.certainty.unwrap_or(default_certainty),
            level: target_level,
            sources: members.iter().map(|m| m.id).collect(),
            ..Default::default()
        };

        // Dedup against existing same-level abstractions
        let mut joined = context_draft.description.clone();
        joined.push(' ');
        joined.push_str(&draft.rule);
        if let Some(existing) = self.store.find_duplicate(target_level, &joined)? {
            self.store
                .record_absorption(&signature, existing, self.clock.now())?;
            self.store.clear_failures(&signature)?;
            stats.contexts_absorbed += 1;
            tracing::debug!(%signature, existing, "cluster absorbed into existing abstraction");
            return Ok(());
        }

        match self.store.put(&context_draft, self.clock.now()) {
            Ok(id) => {
                stats.contexts_written += 1;
                self.store.clear_failures(&signature)?;
                // The members' teaching now lives one level up
                for member in members {
                    self.store.update_certainty(
                        member.id,
                        member.certainty * self.config.member_certainty_factor,
                    )?;
                }
                tracing::info!(id, level = target_level, members = members.len(), "abstraction written");
                Ok(())
            }
            // A writer racing this pass can land the duplicate first
            Err(EngineError::InvariantViolation(Invariant::SemanticDedup)) => {
                if let Some(existing) = self.store.find_duplicate(target_level, &joined)? {
                    self.store
                        .record_absorption(&signature, existing, self.clock.now())?;
                }
                self.store.clear_failures(&signature)?;
                stats.contexts_absorbed += 1;
                Ok(())
            }
            Err(e) => {
                stats.failures += 1;
                self.store.record_failure(
                    &signature,
                    &e.to_string(),
                    self.config.quarantine_after,
                    self.clock.now(),
                )?;
                tracing::warn!(%signature, error = %e, "abstraction write rejected");
                Ok(())
            }
        }
    }
}

fn check_budget(
    budget: &ConsolidationBudget,
    started: Instant,
    stats: &ConsolidationStats,
) -> Result<()> {
    if let Some(max_clusters) = budget.max_clusters {
        if stats.clusters_seen as usize >= max_clusters {
            return Err(EngineError::BudgetExhausted);
        }
    }
    if let Some(max_duration) = budget.max_duration {
        if started.elapsed() >= max_duration {
            return Err(EngineError::BudgetExhausted);
        }
    }
    Ok(())
}

/// Stable signature for a cluster: its member ids, ascending. Membership
/// changes change the signature, which releases any quarantine.
pub fn cluster_signature(members: &[&Context]) -> String {
    let mut ids: Vec<i64> = members.iter().map(|m| m.id).collect();
    ids.sort_unstable();
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn summarize(target_level: u8, members: &[&Context]) -> ClusterSummary {
    let mut node_union: Vec<String> = Vec::new();
    for member in members {
        for name in member.node_names() {
            if !node_union.iter().any(|n| n == name) {
                node_union.push(name.to_string());
            }
        }
    }
    ClusterSummary {
        target_level,
        member_ids: members.iter().map(|m| m.id).collect(),
        descriptions: members.iter().map(|m| m.description.clone()).collect(),
        rules: members.iter().filter_map(|m| m.rule.clone()).collect(),
        node_union,
    }
}

/// Dominant member result, ties resolved toward `complex`
fn merged_result(members: &[&Context]) -> Outcome {
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for member in members {
        *counts.entry(member.result.as_str()).or_insert(0) += 1;
    }
    let best = counts.iter().max_by_key(|(_, n)| **n);
    match best {
        Some((label, n)) if counts.values().filter(|v| **v == *n).count() == 1 => {
            Outcome::parse_name(label)
        }
        Some(_) => Outcome::Complex,
        None => Outcome::Neutral,
    }
}

// ============================================================================
// TESTS
// ============================================================================
