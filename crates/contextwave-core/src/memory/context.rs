//! Context - The fundamental unit of memory
//!
//! A context is a small graph (nodes + edges) with an emotional reading, an
//! outcome, an optional free-text rule, and an abstraction level. Levels run
//! 0 (episode) through 2 (principle) and are hard-capped; level transitions
//! happen only through consolidation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Emotion;
use crate::text;

/// Stable context identifier, monotonically assigned by the store
pub type ContextId = i64;

/// Hard cap on abstraction levels. Raising this re-opens the attractor-basin
/// pathology; see the level-weighting cap in the scorer.
pub const MAX_LEVEL: u8 = 2;

/// Maximum description length in code points
pub const MAX_DESCRIPTION_LEN: usize = 300;

// ============================================================================
// GRAPH PIECES
// ============================================================================

/// A named node with an optional role tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeToken {
    /// Canonical, case-preserving name
    pub name: String,
    /// Optional role tag (actor, object, place, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl NodeToken {
    /// Node with no role tag
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
        }
    }

    /// Node with a role tag
    pub fn with_role(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Some(role.into()),
        }
    }
}

/// A directed, labeled edge between two nodes of the same context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node name; must be a member of the context's nodes
    pub source: String,
    /// Target node name; must be a member of the context's nodes
    pub target: String,
    /// Canonical relation label
    pub relation: String,
}

impl Edge {
    /// Build an edge
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
        }
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

/// How the episode resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Positive,
    Negative,
    Complex,
    #[default]
    Neutral,
    Uncertain,
}

impl Outcome {
    /// Canonical lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Positive => "positive",
            Outcome::Negative => "negative",
            Outcome::Complex => "complex",
            Outcome::Neutral => "neutral",
            Outcome::Uncertain => "uncertain",
        }
    }

    /// Parse a stored label
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "positive" => Outcome::Positive,
            "negative" => Outcome::Negative,
            "complex" => Outcome::Complex,
            "uncertain" => Outcome::Uncertain,
            _ => Outcome::Neutral,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// A stored context. Structurally immutable once persisted; the only
/// permitted mutations are lazy embedding fill-in, bounded certainty updates
/// during consolidation, and being referenced from a later context's sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Store-assigned monotonic id
    pub id: ContextId,
    /// Free text, at most 300 code points
    pub description: String,
    /// Ordered, per-context-deduplicated node sequence
    pub nodes: Vec<NodeToken>,
    /// Ordered edge sequence; endpoints are members of `nodes`
    pub edges: Vec<Edge>,
    /// Normalized emotion label
    pub emotion: Emotion,
    /// Emotional intensity in [0,1]
    pub intensity: f64,
    /// Outcome of the episode
    pub result: Outcome,
    /// Optional free-text teaching extracted from the episode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Token set derived from `rule` at write time
    pub rule_conditions: Vec<String>,
    /// Confidence in [0,1]
    pub certainty: f64,
    /// Abstraction level 0..=2
    pub level: u8,
    /// Ids this context was consolidated from; empty for level 0
    pub sources: Vec<ContextId>,
    /// Optional fixed-dimension embedding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Monotonic creation timestamp
    pub created_at: DateTime<Utc>,
    /// Optional logical day coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_day: Option<i64>,
    /// Optional logical cycle coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_cycle: Option<i64>,
}

impl Context {
    /// Node names in stored order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Set of node names for overlap checks
    pub fn node_name_set(&self) -> BTreeSet<&str> {
        self.node_names().collect()
    }

    /// Distinct relation labels on the edges
    pub fn relation_set(&self) -> BTreeSet<&str> {
        self.edges.iter().map(|e| e.relation.as_str()).collect()
    }

    /// Case-folded token set of `rule` and `description`, for semantic dedup
    pub fn dedup_tokens(&self) -> BTreeSet<String> {
        let mut joined = self.description.clone();
        if let Some(rule) = &self.rule {
            joined.push(' ');
            joined.push_str(rule);
        }
        text::token_set(&joined)
    }

    /// Case-folded token set of the node names, for MMR
    pub fn mmr_tokens(&self) -> BTreeSet<String> {
        text::token_set_of(self.node_names())
    }
}

// ============================================================================
// DRAFT (write-path input)
// ============================================================================

/// Input for creating a context. The store normalizes emotion, dedups nodes,
/// derives rule conditions, clamps intensity/certainty, and validates every
/// invariant before assigning an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContextDraft {
    /// Free text, at most 300 code points
    pub description: String,
    /// Node sequence (duplicates removed on write, first occurrence kept)
    #[serde(default)]
    pub nodes: Vec<NodeToken>,
    /// Edge sequence
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Raw or canonical emotion; normalized on write
    #[serde(default)]
    pub emotion: String,
    /// Emotional intensity, clamped into [0,1]
    #[serde(default)]
    pub intensity: f64,
    /// Outcome
    #[serde(default)]
    pub result: Outcome,
    /// Optional free-text teaching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Confidence, clamped into [0,1]
    #[serde(default = "default_certainty")]
    pub certainty: f64,
    /// Abstraction level; 0 for external writers, 1/2 for the consolidator
    #[serde(default)]
    pub level: u8,
    /// Ids this context was consolidated from
    #[serde(default)]
    pub sources: Vec<ContextId>,
    /// Optional embedding; filled lazily when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Optional caller-supplied dedup key; collisions are surfaced as conflicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    /// Optional logical day coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_day: Option<i64>,
    /// Optional logical cycle coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_cycle: Option<i64>,
}

fn default_certainty() -> f64 {
    1.0
}

impl Default for ContextDraft {
    fn default() -> Self {
        Self {
            description: String::new(),
            nodes: vec![],
            edges: vec![],
            emotion: String::new(),
            intensity: 0.0,
            result: Outcome::Neutral,
            rule: None,
            certainty: 1.0,
            level: 0,
            sources: vec![],
            embedding: None,
            dedup_key: None,
            when_day: None,
            when_cycle: None,
        }
    }
}

// ============================================================================
// RULE CONDITIONS
// ============================================================================

/// Derive rule-condition tokens from a rule: capitalized words plus known
/// entities, restricted to the context's nodes and the canonical entity set
/// so the derived set always satisfies its containment invariant.
pub fn derive_rule_conditions(
    rule: &str,
    node_names: &[&str],
    entities: &[String],
) -> Vec<String> {
    let nodes: BTreeSet<&str> = node_names.iter().copied().collect();
    let entity_set: BTreeSet<&str> = entities.iter().map(|e| e.as_str()).collect();

    let mut out: Vec<String> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for word in text::capitalized_words(rule) {
        if (nodes.contains(word.as_str()) || entity_set.contains(word.as_str()))
            && seen.insert(word.clone())
        {
            out.push(word);
        }
    }
    for word in rule.split(|c: char| !c.is_alphanumeric()) {
        if entity_set.contains(word) && seen.insert(word.to_string()) {
            out.push(word.to_string());
        }
    }
    out
}

// ============================================================================
// STORE STATISTICS
// ============================================================================

/// Operational statistics about the store
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Total stored contexts
    pub total_contexts: i64,
    /// Contexts per level, indexed by level
    pub per_level: [i64; 3],
    /// Contexts holding an embedding
    pub with_embedding: i64,
    /// Contexts not yet referenced from any sources, per level
    pub unconsolidated_per_level: [i64; 3],
    /// Oldest `created_at`
    pub oldest: Option<DateTime<Utc>>,
    /// Newest `created_at`
    pub newest: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================
