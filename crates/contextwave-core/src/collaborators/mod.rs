//! Collaborator Boundaries
//!
//! The engine calls out to three collaborators: an embedder (text to
//! fixed-dimension vector), a generalizer (cluster to abstraction draft),
//! and a clock. All three are injected; the embedder and generalizer are the
//! engine's only suspension points and every call takes a per-call deadline
//! and a cancellation token.
//!
//! Collaborator problems are recovered locally: an embedder failure disables
//! the semantic channel for that operation, a generalizer failure leaves the
//! cluster unconsolidated.

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub mod local;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::memory::{ContextId, Edge};

/// Recommended embedding dimensionality
pub const EMBEDDING_DIMENSIONS: usize = 384;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Error from an embedder or generalizer call
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator failed (refusal, malformed output, transport error)
    #[error("collaborator failed: {0}")]
    Failure(String),
    /// The per-call deadline elapsed
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
    /// The caller's cancellation token fired mid-call
    #[error("collaborator call cancelled")]
    Cancelled,
}

/// Collaborator result type
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

impl From<CollaboratorError> for crate::error::EngineError {
    fn from(e: CollaboratorError) -> Self {
        match e {
            CollaboratorError::Failure(detail) => {
                crate::error::EngineError::CollaboratorFailure(detail)
            }
            CollaboratorError::Timeout(deadline) => {
                crate::error::EngineError::CollaboratorTimeout(deadline)
            }
            CollaboratorError::Cancelled => crate::error::EngineError::Cancelled,
        }
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// Monotonic time source. One clock is consistent across all components
/// within a single retrieval.
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// EMBEDDER
// ============================================================================

/// Text to fixed-dimension vector. Must be idempotent for identical input;
/// the engine caches on that assumption.
pub trait Embedder: Send + Sync {
    /// Embed one text. Implementations should poll `cancel` and respect
    /// `deadline`; the engine treats an overrun exactly like a failure.
    fn embed(
        &self,
        text: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> CollaboratorResult<Vec<f32>>;

    /// Dimensionality of produced vectors
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

// ============================================================================
// GENERALIZER
// ============================================================================

/// What the consolidator hands the generalizer: the cluster's text plus the
/// merged structural material it may draw nodes and edges from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    /// Level the generalization will be written at (member level + 1)
    pub target_level: u8,
    /// Member context ids, ascending
    pub member_ids: Vec<ContextId>,
    /// Member descriptions, in member order
    pub descriptions: Vec<String>,
    /// Member rules (non-empty ones only), in member order
    pub rules: Vec<String>,
    /// Union of member node names, first-seen order
    pub node_union: Vec<String>,
}

/// The generalizer's proposal for a higher-level context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralizationDraft {
    /// Description of the abstraction
    pub description: String,
    /// Proposed teaching
    pub rule: String,
    /// Proposed merged node names
    pub nodes: Vec<String>,
    /// Proposed edges over those nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Proposed emotion, raw; normalized on write
    pub emotion: String,
    /// Proposed intensity; capped at 0.8 regardless of this value
    pub intensity: f64,
    /// Proposed certainty; per-level defaults apply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certainty: Option<f64>,
}

/// Cluster to abstraction draft. Treated as a possibly-failing side effect;
/// the engine never retries inside a single pass.
pub trait Generalizer: Send + Sync {
    /// Generalize one cluster into a draft for the next level up.
    fn generalize(
        &self,
        cluster: &ClusterSummary,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> CollaboratorResult<GeneralizationDraft>;
}

// ============================================================================
// EMBEDDING MATH
// ============================================================================

/// Cosine similarity between two vectors; 0.0 on dimension mismatch or zero
/// norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Serialize a vector to little-endian bytes for blob storage
pub fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a blob back into a vector; `None` on ragged input
pub fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

// ============================================================================
// TESTS
// ============================================================================
