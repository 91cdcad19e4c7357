//! # Contextwave Core
//!
//! Content-addressed associative memory engine. The primary operation is
//! *wave retrieval*: given a heterogeneous query signal, return a small,
//! diverse set of stored contexts ranked by multi-channel resonance, then
//! periodically compact the store by clustering and rule extraction.
//!
//! - **Context graph store**: SQLite-backed contexts across abstraction
//!   levels 0..=2 with inverted indexes and hard invariants
//! - **Wave signals**: canonical queries built from situation snapshots
//!   (focus tokens, capitalized text, hungry-drive seeds, pain telemetry)
//! - **Multi-channel resonance**: node/relation/emotion/result/semantic/
//!   rule-condition channels, recency suppression, level weighting
//! - **Diversity selection**: per-emotion cap and MMR over node sets deliver
//!   a bounded working memory
//! - **Consolidation**: off-line clustering of episodes into
//!   generalizations and principles through an external generalizer
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contextwave_core::{ContextDraft, EngineConfig, NodeToken, Situation, WaveEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = WaveEngine::open(None, EngineConfig::default())?;
//!
//! // Remember an episode
//! let draft = ContextDraft {
//!     description: "Egor criticized the refactor, and was right".to_string(),
//!     nodes: vec![NodeToken::bare("Egor"), NodeToken::bare("refactor")],
//!     emotion: "hurt".to_string(),
//!     ..Default::default()
//! };
//! let id = engine.write(&draft)?;
//!
//! // Later: retrieve working memory for a situation
//! let situation = Situation {
//!     text: vec!["Egor sent another review".to_string()],
//!     ..Default::default()
//! };
//! let cancel = CancellationToken::new();
//! let (signal, _diagnostics) = engine.build_signal(&situation, &cancel);
//! let slate = engine.retrieve(&signal, 7, None, &cancel)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): bundle SQLite with the crate
//! - `embeddings`: a local fastembed-backed [`Embedder`] implementation
//! - `full`: everything

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod collaborators;
pub mod consolidation;
pub mod engine;
pub mod error;
pub mod memory;
pub mod resonance;
pub mod retrieval;
pub mod signal;
pub mod storage;
pub mod text;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Memory types
pub use memory::{
    derive_rule_conditions, Context, ContextDraft, ContextId, Edge, Emotion, NodeToken, Outcome,
    StoreStats, Valence, ALL_EMOTIONS, MAX_DESCRIPTION_LEN, MAX_LEVEL,
};

// Error taxonomy
pub use error::{EngineError, Invariant, Result};

// Storage layer
pub use storage::{ContextStore, StoreConfig};

// Signal construction
pub use signal::{SignalBuilder, SignalConfig, Situation, WaveSignal};

// Resonance scoring
pub use resonance::{recency_factor, score_context, ChannelBreakdown, ScorerConfig};

// Diversity selection
pub use retrieval::{
    DiversitySelector, RetrievalOptions, ScoredContext, DEFAULT_SLATE_SIZE,
};

// Consolidation
pub use consolidation::{
    cluster_by_node_overlap, cluster_signature, ClusterParams, ConsolidationBudget,
    ConsolidationConfig, ConsolidationStats, Consolidator,
};

// Collaborator boundaries
pub use collaborators::{
    cosine_similarity, Clock, ClusterSummary, CollaboratorError, CollaboratorResult, Embedder,
    GeneralizationDraft, Generalizer, SystemClock, EMBEDDING_DIMENSIONS,
};

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub use collaborators::local::LocalEmbedder;

// Engine facade
pub use engine::{EngineConfig, Incident, IncidentKind, WaveEngine};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ChannelBreakdown, Clock, ConsolidationBudget, ConsolidationStats, Context, ContextDraft,
        ContextId, ContextStore, Emotion, EngineConfig, EngineError, Outcome, Result,
        RetrievalOptions, ScoredContext, Situation, StoreStats, WaveEngine, WaveSignal,
    };

    #[cfg(feature = "embeddings")]
    pub use crate::LocalEmbedder;
}
