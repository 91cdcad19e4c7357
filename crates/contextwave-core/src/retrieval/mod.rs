//! Diversity-Constrained Selection
//!
//! Reduces a scored candidate list to the bounded working-memory slate:
//! resonance floor, per-emotion cap, MMR over node-token Jaccard with
//! stepwise relaxation, and optional level fairness. Output order is
//! deterministic: resonance descending, then id ascending.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::memory::Context;
use crate::resonance::ChannelBreakdown;

// ============================================================================
// OPTIONS
// ============================================================================

/// Per-retrieval knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOptions {
    /// Pre-selector width: how many scored candidates the selector sees
    pub k_candidates: usize,
    /// Resonance floor; candidates below it are dropped
    pub r_min: f64,
    /// MMR Jaccard ceiling over node token sets
    pub tau_mmr: f64,
    /// Maximum survivors sharing an emotion first word
    pub per_emotion_cap: usize,
    /// Guarantee an episode in the slate when abstractions dominate
    pub level_fairness: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k_candidates: 30,
            r_min: 0.0,
            tau_mmr: 0.6,
            per_emotion_cap: 2,
            level_fairness: true,
        }
    }
}

/// Default working-memory size
pub const DEFAULT_SLATE_SIZE: usize = 7;

// ============================================================================
// SCORED CONTEXT
// ============================================================================

/// One retrieval result: the context, its final resonance and the channel
/// breakdown kept for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredContext {
    /// The stored context
    pub context: Context,
    /// Final resonance after modifiers
    pub resonance: f64,
    /// Per-channel diagnostics
    pub breakdown: ChannelBreakdown,
}

// ============================================================================
// SELECTOR
// ============================================================================

/// Diversity-constrained slate selection
#[derive(Debug, Clone, Default)]
pub struct DiversitySelector;

impl DiversitySelector {
    /// Reduce scored candidates to at most `k` results.
    ///
    /// Candidates are visited greedily in (resonance desc, created_at desc,
    /// id asc) order; a candidate is taken when its emotion group is under
    /// the cap and its node overlap with everything already taken is within
    /// the MMR ceiling. While the slate is short the overlap requirement
    /// relaxes in 0.1 steps until it vanishes at a ceiling of 1.0.
    pub fn select(
        &self,
        mut candidates: Vec<ScoredContext>,
        k: usize,
        options: &RetrievalOptions,
    ) -> Vec<ScoredContext> {
        if k == 0 {
            return vec![];
        }

        // Resonance floor
        candidates.retain(|c| c.resonance >= options.r_min);

        // Greedy visit order; ties on resonance prefer the later context
        candidates.sort_by(|a, b| {
            b.resonance
                .partial_cmp(&a.resonance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.context.created_at.cmp(&a.context.created_at))
                .then(a.context.id.cmp(&b.context.id))
        });

        let token_sets: Vec<BTreeSet<String>> =
            candidates.iter().map(|c| c.context.mmr_tokens()).collect();

        let mut picked: Vec<usize> = Vec::new();
        let mut taken = vec![false; candidates.len()];
        let mut emotion_counts: HashMap<&'static str, usize> = HashMap::new();

        let mut tau = options.tau_mmr;
        loop {
            for (i, candidate) in candidates.iter().enumerate() {
                if picked.len() >= k {
                    break;
                }
                if taken[i] {
                    continue;
                }
                let group = candidate.context.emotion.first_word();
                if emotion_counts.get(group).copied().unwrap_or(0) >= options.per_emotion_cap {
                    continue;
                }
                let overlaps = picked
                    .iter()
                    .any(|&p| crate::text::jaccard(&token_sets[i], &token_sets[p]) > tau);
                if overlaps {
                    continue;
                }
                taken[i] = true;
                picked.push(i);
                *emotion_counts.entry(group).or_insert(0) += 1;
            }
            if picked.len() >= k || tau >= 1.0 {
                break;
            }
            // Relax the overlap requirement before giving up
            tau = (tau + 0.1).min(1.0);
        }

        // Level fairness: when abstractions crowded out every episode but an
        // episode was above the floor, trade the weakest pick for the best one
        if options.level_fairness
            && !picked.is_empty()
            && !picked.iter().any(|&p| candidates[p].context.level == 0)
        {
            let nonzero_levels: BTreeSet<u8> = candidates
                .iter()
                .filter(|c| c.context.level > 0)
                .map(|c| c.context.level)
                .collect();
            if nonzero_levels.len() > 1 {
                let replacement = candidates.iter().enumerate().find(|(i, c)| {
                    !taken[*i]
                        && c.context.level == 0
                        && emotion_counts
                            .get(c.context.emotion.first_word())
                            .copied()
                            .unwrap_or(0)
                            < options.per_emotion_cap
                });
                if let Some((idx, _)) = replacement {
                    let weakest = picked.pop().expect("picked is non-empty");
                    taken[weakest] = false;
                    picked.push(idx);
                }
            }
        }

        // Deterministic output order: resonance desc, id asc
        let mut slate: Vec<ScoredContext> =
            picked.into_iter().map(|i| candidates[i].clone()).collect();
        slate.sort_by(|a, b| {
            b.resonance
                .partial_cmp(&a.resonance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.context.id.cmp(&b.context.id))
        });
        slate
    }
}

// ============================================================================
// TESTS
// ============================================================================
