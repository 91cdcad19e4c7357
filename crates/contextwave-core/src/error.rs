//! Engine Error Taxonomy
//!
//! One enumerated error kind per failure class. Collaborator problems are
//! recovered locally wherever possible (a retrieval just loses a channel);
//! invariant violations are never recovered - the write is rejected and the
//! caller must fix its input.

use std::time::Duration;

use crate::memory::ContextId;

// ============================================================================
// INVARIANTS
// ============================================================================

/// The storage invariant a rejected write (or purge) would have broken.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Invariant {
    /// Abstraction level above the hard cap of 2
    LevelCap,
    /// An edge endpoint is not a member of the context's node set
    EdgeEndpoint,
    /// A source id is missing, or not of strictly lower level
    SourceLevel,
    /// Sources present on a level-0 context
    SourceOnEpisode,
    /// A source id is already claimed by another context (exclusive mode)
    SourceExclusivity,
    /// Jaccard overlap with an existing same-level context above the dedup threshold
    SemanticDedup,
    /// Merged node count above the configured bound for L1+ contexts
    NodeCap,
    /// Description longer than the allowed number of code points
    DescriptionLength,
    /// Purge would remove a context referenced in another's sources
    PurgeReferenced,
}

impl Invariant {
    /// Stable identifier for logs and structured errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Invariant::LevelCap => "level_cap",
            Invariant::EdgeEndpoint => "edge_endpoint",
            Invariant::SourceLevel => "source_level",
            Invariant::SourceOnEpisode => "source_on_episode",
            Invariant::SourceExclusivity => "source_exclusivity",
            Invariant::SemanticDedup => "semantic_dedup",
            Invariant::NodeCap => "node_cap",
            Invariant::DescriptionLength => "description_length",
            Invariant::PurgeReferenced => "purge_referenced",
        }
    }
}

impl std::fmt::Display for Invariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ENGINE ERROR
// ============================================================================

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A write violated a storage invariant and was rejected
    #[error("invariant violation: {0}")]
    InvariantViolation(Invariant),
    /// Context not found
    #[error("context not found: {0}")]
    NotFound(ContextId),
    /// A candidate referenced a source that is gone from the snapshot
    #[error("stale snapshot: context {context} references missing source {missing_source}")]
    StaleSnapshot {
        /// The candidate holding the dangling reference
        context: ContextId,
        /// The referenced id absent from the snapshot
        missing_source: ContextId,
    },
    /// An embedder or generalizer call failed
    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),
    /// An embedder or generalizer call exceeded its deadline
    #[error("collaborator timeout after {0:?}")]
    CollaboratorTimeout(Duration),
    /// The operation's cancellation token fired; partial work was discarded
    #[error("operation cancelled")]
    Cancelled,
    /// The consolidation budget ran out; partial stats were returned
    #[error("consolidation budget exhausted")]
    BudgetExhausted,
    /// A caller-supplied dedup key collided with a stored context
    #[error("dedup key conflict: {0}")]
    Conflict(String),
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error (paths, locks, migrations)
    #[error("initialization error: {0}")]
    Init(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// TESTS
// ============================================================================
