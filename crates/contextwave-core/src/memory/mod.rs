//! Memory module - Core types and data structures
//!
//! Implements the context-graph memory model:
//! - Contexts (graph + emotion + outcome + optional rule) across levels 0..=2
//! - The closed canonical emotion set with its normalization pipeline
//! - Write-path drafts and operational statistics

mod context;
mod emotion;

pub use context::{
    Context, ContextDraft, ContextId, Edge, NodeToken, Outcome, StoreStats,
    derive_rule_conditions, MAX_DESCRIPTION_LEN, MAX_LEVEL,
};
pub use emotion::{Emotion, Valence, ALL_EMOTIONS};
