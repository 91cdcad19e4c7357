//! Multi-Channel Resonance Scoring
//!
//! Scores one candidate context against a wave signal. Six channels, each in
//! [0,1], averaged over the channels active for the pair; a channel is
//! active only when both sides provide non-empty input for it. Modifiers
//! run in a fixed order: recency suppression, level weighting, drive-bias
//! bonus with a final clamp.
//!
//! Scoring one context is a pure function of (signal, context, now); the
//! engine bulk-scores a snapshot and only then selects.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::cosine_similarity;
use crate::memory::Context;
use crate::signal::WaveSignal;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Scorer tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorerConfig {
    /// Hours after which recency suppression fully releases
    pub recency_ceiling_hours: f64,
    /// Suppression floor for brand-new contexts
    pub recency_floor: f64,
    /// Per-level boost; capped at level 3 to keep the attractor closed
    pub level_weight: f64,
    /// Additive bonus when a hungry-drive seed node appears in the context
    pub drive_bonus: f64,
    /// Ceiling on the final resonance
    pub max_resonance: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            recency_ceiling_hours: 24.0,
            recency_floor: 0.2,
            level_weight: 0.05,
            drive_bonus: 0.05,
            max_resonance: 1.2,
        }
    }
}

// ============================================================================
// CHANNEL BREAKDOWN
// ============================================================================

/// Per-channel diagnostics for one scored pair. `None` means the channel was
/// inactive for the pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBreakdown {
    /// Node overlap relative to the signal's node set
    pub node: Option<f64>,
    /// Relation overlap relative to the signal's relation set
    pub relation: Option<f64>,
    /// Emotion match (exact 1.0, same valence class 0.5)
    pub emotion: Option<f64>,
    /// Result match (exact 1.0)
    pub result: Option<f64>,
    /// Clamped cosine over embeddings
    pub semantic: Option<f64>,
    /// Signal-node coverage of the context's rule conditions
    pub rule_condition: Option<f64>,
    /// Mean over active channels before modifiers
    pub raw: f64,
    /// Recency suppression factor applied
    pub recency_factor: f64,
    /// Level weighting factor applied
    pub level_factor: f64,
    /// Drive-bias bonus applied
    pub drive_bonus: f64,
}

impl ChannelBreakdown {
    fn active(&self) -> impl Iterator<Item = f64> + '_ {
        [
            self.node,
            self.relation,
            self.emotion,
            self.result,
            self.semantic,
            self.rule_condition,
        ]
        .into_iter()
        .flatten()
    }
}

// ============================================================================
// SCORER
// ============================================================================

/// Recency suppression factor for a context of age `hours`. Fresh contexts
/// are held down so the engine does not echo the immediate past; anything
/// past the ceiling is unaffected.
pub fn recency_factor(hours: f64, config: &ScorerConfig) -> f64 {
    let age = (hours / config.recency_ceiling_hours).clamp(0.0, 1.0);
    (config.recency_floor + (1.0 - config.recency_floor) * age).min(1.0)
}

/// Score one candidate against a signal. Pure; `now` comes from the
/// retrieval's single clock reading.
pub fn score_context(
    signal: &WaveSignal,
    ctx: &Context,
    now: DateTime<Utc>,
    config: &ScorerConfig,
) -> (f64, ChannelBreakdown) {
    let mut breakdown = ChannelBreakdown::default();

    let ctx_nodes = ctx.node_name_set();

    // Node overlap
    if !signal.nodes.is_empty() && !ctx_nodes.is_empty() {
        let hits = signal
            .nodes
            .iter()
            .filter(|n| ctx_nodes.contains(n.as_str()))
            .count();
        breakdown.node = Some(hits as f64 / signal.nodes.len() as f64);
    }

    // Relation overlap
    let ctx_relations = ctx.relation_set();
    if !signal.relations.is_empty() && !ctx_relations.is_empty() {
        let hits = signal
            .relations
            .iter()
            .filter(|r| ctx_relations.contains(r.as_str()))
            .count();
        breakdown.relation = Some(hits as f64 / signal.relations.len() as f64);
    }

    // Emotion match
    if let Some(signal_emotion) = signal.emotion {
        breakdown.emotion = Some(if signal_emotion == ctx.emotion {
            1.0
        } else if signal_emotion.valence() == ctx.emotion.valence() {
            0.5
        } else {
            0.0
        });
    }

    // Result match
    if let Some(signal_result) = signal.result {
        breakdown.result = Some(if signal_result == ctx.result { 1.0 } else { 0.0 });
    }

    // Semantic
    if let (Some(signal_emb), Some(ctx_emb)) = (&signal.embedding, &ctx.embedding) {
        breakdown.semantic = Some(cosine_similarity(signal_emb, ctx_emb).max(0.0) as f64);
    }

    // Rule-condition coverage
    if !signal.nodes.is_empty() && !ctx.rule_conditions.is_empty() {
        let conditions: BTreeSet<&str> =
            ctx.rule_conditions.iter().map(|t| t.as_str()).collect();
        let hits = signal
            .nodes
            .iter()
            .filter(|n| conditions.contains(n.as_str()))
            .count();
        breakdown.rule_condition = Some(hits as f64 / conditions.len() as f64);
    }

    // Raw resonance: arithmetic mean over active channels
    let active: Vec<f64> = breakdown.active().collect();
    breakdown.raw = if active.is_empty() {
        0.0
    } else {
        active.iter().sum::<f64>() / active.len() as f64
    };

    // Modifier 1: recency suppression
    let hours = (now - ctx.created_at).num_seconds() as f64 / 3600.0;
    breakdown.recency_factor = recency_factor(hours.max(0.0), config);

    // Modifier 2: level weighting, capped
    breakdown.level_factor = 1.0 + config.level_weight * f64::from(ctx.level.min(3));

    let mut resonance = breakdown.raw * breakdown.recency_factor * breakdown.level_factor;

    // Modifier 3: drive-bias alignment
    if !signal.drive_bias.is_empty()
        && signal
            .drive_nodes
            .iter()
            .any(|seed| ctx_nodes.contains(seed.as_str()))
    {
        breakdown.drive_bonus = config.drive_bonus;
        resonance += config.drive_bonus;
    }

    (resonance.min(config.max_resonance), breakdown)
}

// ============================================================================
// TESTS
// ============================================================================
