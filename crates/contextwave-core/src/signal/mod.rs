//! Wave Signal Construction
//!
//! Turns an external situation snapshot into the canonical query signal:
//! nodes from focus, capitalized free-text tokens and hungry-drive seeds;
//! relations from a configured verb table; emotion through the storage
//! normalization pipeline; result from pain telemetry.
//!
//! The builder is pure: the same snapshot always yields the same signal.
//! Embeddings are attached later by the engine, which owns the embedder.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::memory::{Emotion, Outcome, MAX_LEVEL};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Signal construction tunables. The relation keyword table and the drive
/// seed map are configuration data; extending them is not a code change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalConfig {
    /// Verb token (lowercased) -> canonical relation label
    pub relation_keywords: BTreeMap<String, String>,
    /// Drive name -> seed nodes injected when the drive is hungry
    pub drive_seeds: BTreeMap<String, Vec<String>>,
    /// Drives below this level are hungry
    pub hunger_threshold: f64,
    /// Signal node set bound; overflow drops in stable insertion order
    pub max_nodes: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        let mut relation_keywords = BTreeMap::new();
        for (verb, label) in [
            ("criticized", "criticized"),
            ("criticizes", "criticized"),
            ("criticize", "criticized"),
            ("praised", "praised"),
            ("praises", "praised"),
            ("asked", "asked"),
            ("asks", "asked"),
            ("sent", "sent"),
            ("sends", "sent"),
            ("challenged", "challenged"),
            ("challenges", "challenged"),
            ("created", "created"),
            ("creates", "created"),
            ("learned", "learned"),
            ("learns", "learned"),
            ("broke", "broke"),
            ("breaks", "broke"),
            ("fixed", "fixed"),
            ("fixes", "fixed"),
        ] {
            relation_keywords.insert(verb.to_string(), label.to_string());
        }

        let mut drive_seeds = BTreeMap::new();
        drive_seeds.insert(
            "connection".to_string(),
            vec![
                "Egor".to_string(),
                "Telegram".to_string(),
                "message".to_string(),
            ],
        );
        drive_seeds.insert(
            "creation".to_string(),
            vec![
                "building".to_string(),
                "making".to_string(),
                "writing".to_string(),
            ],
        );

        Self {
            relation_keywords,
            drive_seeds,
            hunger_threshold: 0.3,
            max_nodes: 20,
        }
    }
}

// ============================================================================
// SITUATION (external input)
// ============================================================================

/// Structured snapshot handed in by the orchestrator. Drive levels and pain
/// telemetry arrive pre-computed; the engine never models them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Situation {
    /// Explicit focus tokens
    #[serde(default)]
    pub focus: Vec<String>,
    /// Free-text fields (observations, inner monologue, incoming messages)
    #[serde(default)]
    pub text: Vec<String>,
    /// Reported emotion, raw
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    /// Reported pain intensity in [0,1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pain: Option<f64>,
    /// Drive name -> satisfaction level in [0,1]
    #[serde(default)]
    pub drives: BTreeMap<String, f64>,
    /// Level cap for candidate contexts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level: Option<u8>,
}

// ============================================================================
// WAVE SIGNAL
// ============================================================================

/// The canonical query signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaveSignal {
    /// Query nodes, bounded, stable insertion order
    pub nodes: Vec<String>,
    /// Canonical relation labels found in the situation text
    pub relations: Vec<String>,
    /// Normalized emotion; absent when the situation reported none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    /// Result reading from pain telemetry; absent when none was reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Outcome>,
    /// Candidate level cap
    pub max_level: u8,
    /// Hungry drives, retained for downstream weighting
    pub drive_bias: BTreeMap<String, f64>,
    /// Seed nodes injected by hungry drives
    pub drive_nodes: Vec<String>,
    /// Optional query embedding; absent skips the semantic channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Default for WaveSignal {
    fn default() -> Self {
        Self {
            nodes: vec![],
            relations: vec![],
            emotion: None,
            result: None,
            max_level: MAX_LEVEL,
            drive_bias: BTreeMap::new(),
            drive_nodes: vec![],
            embedding: None,
        }
    }
}

impl WaveSignal {
    /// A signal carrying only a level cap; scores zero against everything
    pub fn empty(max_level: u8) -> Self {
        Self {
            max_level: max_level.min(MAX_LEVEL),
            ..Default::default()
        }
    }
}

// ============================================================================
// SIGNAL BUILDER
// ============================================================================

/// Pure situation -> signal transform
#[derive(Debug, Clone, Default)]
pub struct SignalBuilder {
    config: SignalConfig,
}

impl SignalBuilder {
    /// Builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder with custom configuration
    pub fn with_config(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Current configuration
    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Build the canonical signal for a situation
    pub fn build(&self, situation: &Situation) -> WaveSignal {
        let mut nodes: Vec<String> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let push_node = |name: &str, nodes: &mut Vec<String>, seen: &mut BTreeSet<String>| {
            let trimmed = name.trim();
            if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
                nodes.push(trimmed.to_string());
            }
        };

        // (a) explicit focus
        for token in &situation.focus {
            push_node(token, &mut nodes, &mut seen);
        }
        // (b) capitalized single-word tokens in free text
        for field in &situation.text {
            for word in crate::text::capitalized_words(field) {
                push_node(&word, &mut nodes, &mut seen);
            }
        }
        // (c) seeds for hungry drives
        let mut drive_bias: BTreeMap<String, f64> = BTreeMap::new();
        let mut drive_nodes: Vec<String> = Vec::new();
        for (drive, level) in &situation.drives {
            if *level < self.config.hunger_threshold {
                drive_bias.insert(drive.clone(), *level);
                if let Some(seeds) = self.config.drive_seeds.get(drive) {
                    for seed in seeds {
                        if seen.insert(seed.clone()) {
                            nodes.push(seed.clone());
                        }
                        if !drive_nodes.contains(seed) {
                            drive_nodes.push(seed.clone());
                        }
                    }
                }
            }
        }
        // Bounded: overflow dropped in stable insertion order
        nodes.truncate(self.config.max_nodes);

        // Relations from the keyword table
        let mut relations: Vec<String> = Vec::new();
        let mut seen_relations: BTreeSet<&str> = BTreeSet::new();
        for field in &situation.text {
            for word in field.split(|c: char| !c.is_alphanumeric()) {
                if word.is_empty() {
                    continue;
                }
                let folded = word.to_lowercase();
                if let Some(label) = self.config.relation_keywords.get(&folded) {
                    if seen_relations.insert(label.as_str()) {
                        relations.push(label.clone());
                    }
                }
            }
        }

        WaveSignal {
            nodes,
            relations,
            emotion: situation.emotion.as_deref().map(Emotion::normalize),
            result: situation.pain.map(|p| {
                if p > 0.5 {
                    Outcome::Negative
                } else {
                    Outcome::Neutral
                }
            }),
            max_level: situation.max_level.unwrap_or(MAX_LEVEL).min(MAX_LEVEL),
            drive_bias,
            drive_nodes,
            embedding: None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
