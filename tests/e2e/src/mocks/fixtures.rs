//! Test Data Factory and Scripted Collaborators
//!
//! Deterministic stand-ins for the engine's collaborators:
//! - A settable clock so recency behavior is exact
//! - A hash-based embedder (idempotent, no model)
//! - Generalizers that answer from a script, always fail, or cancel the
//!   pass mid-cluster

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contextwave_core::{
    Clock, ClusterSummary, CollaboratorError, CollaboratorResult, ContextDraft, Embedder,
    GeneralizationDraft, Generalizer, NodeToken,
};
use tokio_util::sync::CancellationToken;

// ============================================================================
// FIXTURES
// ============================================================================

/// A level-0 draft with bare nodes
pub fn episode(description: &str, nodes: &[&str], emotion: &str) -> ContextDraft {
    ContextDraft {
        description: description.to_string(),
        nodes: nodes.iter().map(|n| NodeToken::bare(*n)).collect(),
        emotion: emotion.to_string(),
        ..Default::default()
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// Settable clock; tests move time instead of sleeping
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    /// Clock pinned to `t`
    pub fn at(t: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(t) }
    }

    /// Jump to an absolute instant
    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = t;
    }

    /// Move forward
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += delta;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

// ============================================================================
// EMBEDDERS
// ============================================================================

/// Deterministic 8-dimensional embedding from the text bytes. Idempotent by
/// construction, like the real collaborator contract demands.
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(
        &self,
        text: &str,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> CollaboratorResult<Vec<f32>> {
        let mut v = vec![0.0f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            v[i % 8] += f32::from(byte) / 255.0;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        8
    }
}

/// Embedder that always times out
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(
        &self,
        _text: &str,
        deadline: Duration,
        _cancel: &CancellationToken,
    ) -> CollaboratorResult<Vec<f32>> {
        Err(CollaboratorError::Timeout(deadline))
    }

    fn dimensions(&self) -> usize {
        8
    }
}

// ============================================================================
// GENERALIZERS
// ============================================================================

/// Generalizer answering from a queue of scripted responses; when the queue
/// runs dry it derives a plain draft from the cluster itself. Counts calls.
pub struct ScriptedGeneralizer {
    responses: Mutex<VecDeque<CollaboratorResult<GeneralizationDraft>>>,
    calls: AtomicUsize,
}

impl ScriptedGeneralizer {
    /// Generalizer with no script: every cluster gets a derived draft
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Generalizer answering the given responses in order
    pub fn scripted(responses: Vec<CollaboratorResult<GeneralizationDraft>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `generalize` ran
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A plausible draft derived from a cluster
    pub fn derived_draft(cluster: &ClusterSummary) -> GeneralizationDraft {
        GeneralizationDraft {
            description: format!(
                "a pattern across {} related episodes",
                cluster.member_ids.len()
            ),
            rule: format!(
                "Episodes around {} tend to repeat; meet them deliberately.",
                cluster.node_union.first().cloned().unwrap_or_default()
            ),
            nodes: cluster.node_union.clone(),
            edges: vec![],
            emotion: "resolve".to_string(),
            intensity: 1.0,
            certainty: None,
        }
    }
}

impl Default for ScriptedGeneralizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Generalizer for ScriptedGeneralizer {
    fn generalize(
        &self,
        cluster: &ClusterSummary,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> CollaboratorResult<GeneralizationDraft> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.responses.lock().expect("script lock").pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(Self::derived_draft(cluster)),
        }
    }
}

/// Generalizer that always fails the same way
pub struct FailingGeneralizer {
    error: CollaboratorError,
    calls: AtomicUsize,
}

impl FailingGeneralizer {
    /// Failing generalizer with the given error
    pub fn new(error: CollaboratorError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `generalize` ran
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Generalizer for FailingGeneralizer {
    fn generalize(
        &self,
        _cluster: &ClusterSummary,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> CollaboratorResult<GeneralizationDraft> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Generalizer that cancels the pass mid-cluster, simulating an operator
/// pulling the plug while a cluster is in flight
pub struct CancellingGeneralizer {
    token: CancellationToken,
}

impl CancellingGeneralizer {
    /// Will cancel `token` on first use
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Generalizer for CancellingGeneralizer {
    fn generalize(
        &self,
        _cluster: &ClusterSummary,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> CollaboratorResult<GeneralizationDraft> {
        self.token.cancel();
        Err(CollaboratorError::Cancelled)
    }
}
