//! Canonical Emotion Set
//!
//! Emotion is a closed enum; free-form phrases never persist. Normalization
//! runs exact match, then the alias table, then a compound split scanning
//! for any canonical token, then a synonym keyword scan, and finally falls
//! back to `neutral`.

use serde::{Deserialize, Serialize};

// ============================================================================
// EMOTION
// ============================================================================

/// The canonical emotion set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Pride,
    Curiosity,
    Warmth,
    Relief,
    Awe,
    Flow,
    #[default]
    Neutral,
    Frustration,
    Loneliness,
    Hurt,
    Fear,
    Sadness,
    Anger,
    Disgust,
    Surprise,
    Resolve,
    Longing,
}

/// Valence class of an emotion; same-class matches score half credit on the
/// emotion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Valence {
    Positive,
    Negative,
    Neutral,
    Surprise,
}

/// All canonical emotions, for iteration in tests and tooling
pub const ALL_EMOTIONS: &[Emotion] = &[
    Emotion::Joy,
    Emotion::Pride,
    Emotion::Curiosity,
    Emotion::Warmth,
    Emotion::Relief,
    Emotion::Awe,
    Emotion::Flow,
    Emotion::Neutral,
    Emotion::Frustration,
    Emotion::Loneliness,
    Emotion::Hurt,
    Emotion::Fear,
    Emotion::Sadness,
    Emotion::Anger,
    Emotion::Disgust,
    Emotion::Surprise,
    Emotion::Resolve,
    Emotion::Longing,
];

/// Exact-string aliases (full input, lowercased) -> canonical emotion
const ALIASES: &[(&str, Emotion)] = &[
    ("happiness", Emotion::Joy),
    ("happy", Emotion::Joy),
    ("glad", Emotion::Joy),
    ("delight", Emotion::Joy),
    ("proud", Emotion::Pride),
    ("curious", Emotion::Curiosity),
    ("interested", Emotion::Curiosity),
    ("love", Emotion::Warmth),
    ("affection", Emotion::Warmth),
    ("tenderness", Emotion::Warmth),
    ("relieved", Emotion::Relief),
    ("wonder", Emotion::Awe),
    ("amazement", Emotion::Awe),
    ("focused", Emotion::Flow),
    ("absorbed", Emotion::Flow),
    ("calm", Emotion::Neutral),
    ("frustrated", Emotion::Frustration),
    ("annoyed", Emotion::Frustration),
    ("irritated", Emotion::Frustration),
    ("lonely", Emotion::Loneliness),
    ("isolation", Emotion::Loneliness),
    ("wounded", Emotion::Hurt),
    ("betrayed", Emotion::Hurt),
    ("afraid", Emotion::Fear),
    ("scared", Emotion::Fear),
    ("anxious", Emotion::Fear),
    ("anxiety", Emotion::Fear),
    ("sad", Emotion::Sadness),
    ("grief", Emotion::Sadness),
    ("sorrow", Emotion::Sadness),
    ("angry", Emotion::Anger),
    ("mad", Emotion::Anger),
    ("furious", Emotion::Anger),
    ("rage", Emotion::Anger),
    ("disgusted", Emotion::Disgust),
    ("revulsion", Emotion::Disgust),
    ("surprised", Emotion::Surprise),
    ("shocked", Emotion::Surprise),
    ("startled", Emotion::Surprise),
    ("determined", Emotion::Resolve),
    ("determination", Emotion::Resolve),
    ("yearning", Emotion::Longing),
    ("missing", Emotion::Longing),
    ("nostalgia", Emotion::Longing),
];

/// Synonym keywords scanned word-by-word inside compound phrases
const SYNONYMS: &[(&str, Emotion)] = &[
    ("dread", Emotion::Fear),
    ("terror", Emotion::Fear),
    ("worry", Emotion::Fear),
    ("worried", Emotion::Fear),
    ("panic", Emotion::Fear),
    ("excitement", Emotion::Joy),
    ("excited", Emotion::Joy),
    ("cheerful", Emotion::Joy),
    ("melancholy", Emotion::Sadness),
    ("despair", Emotion::Sadness),
    ("abandoned", Emotion::Loneliness),
    ("alone", Emotion::Loneliness),
    ("resentment", Emotion::Anger),
    ("contempt", Emotion::Disgust),
    ("ache", Emotion::Hurt),
    ("fascination", Emotion::Curiosity),
    ("intrigue", Emotion::Curiosity),
];

impl Emotion {
    /// Canonical lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Pride => "pride",
            Emotion::Curiosity => "curiosity",
            Emotion::Warmth => "warmth",
            Emotion::Relief => "relief",
            Emotion::Awe => "awe",
            Emotion::Flow => "flow",
            Emotion::Neutral => "neutral",
            Emotion::Frustration => "frustration",
            Emotion::Loneliness => "loneliness",
            Emotion::Hurt => "hurt",
            Emotion::Fear => "fear",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Disgust => "disgust",
            Emotion::Surprise => "surprise",
            Emotion::Resolve => "resolve",
            Emotion::Longing => "longing",
        }
    }

    /// Exact canonical-token parse; no aliasing
    pub fn parse_canonical(token: &str) -> Option<Self> {
        ALL_EMOTIONS
            .iter()
            .copied()
            .find(|e| e.as_str() == token.to_lowercase())
    }

    /// Full normalization pipeline: exact, alias, compound split over
    /// canonical tokens, synonym scan, `neutral`.
    pub fn normalize(raw: &str) -> Self {
        let folded = raw.trim().to_lowercase();
        if folded.is_empty() {
            return Emotion::Neutral;
        }

        if let Some(exact) = Self::parse_canonical(&folded) {
            return exact;
        }

        if let Some((_, aliased)) = ALIASES.iter().find(|(a, _)| *a == folded) {
            return *aliased;
        }

        // Compound input: first recognized canonical token wins
        let words: Vec<&str> = folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        for word in &words {
            if let Some(canonical) = Self::parse_canonical(word) {
                return canonical;
            }
        }

        // Synonym keyword scan over the same words (aliases double as keywords)
        for word in &words {
            if let Some((_, e)) = SYNONYMS.iter().find(|(k, _)| k == word) {
                return *e;
            }
            if let Some((_, e)) = ALIASES.iter().find(|(a, _)| a == word) {
                return *e;
            }
        }

        Emotion::Neutral
    }

    /// Valence class for the emotion channel's half-credit match
    pub fn valence(&self) -> Valence {
        match self {
            Emotion::Joy
            | Emotion::Pride
            | Emotion::Curiosity
            | Emotion::Warmth
            | Emotion::Relief
            | Emotion::Awe
            | Emotion::Flow
            | Emotion::Resolve
            | Emotion::Longing => Valence::Positive,
            Emotion::Frustration
            | Emotion::Loneliness
            | Emotion::Hurt
            | Emotion::Fear
            | Emotion::Sadness
            | Emotion::Anger
            | Emotion::Disgust => Valence::Negative,
            Emotion::Neutral => Valence::Neutral,
            Emotion::Surprise => Valence::Surprise,
        }
    }

    /// First word of the label; the diversity selector's per-emotion cap
    /// groups by this. Canonical labels are single words, so this is the
    /// label itself.
    pub fn first_word(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_canonical(s).ok_or_else(|| format!("Unknown emotion: {}", s))
    }
}

// ============================================================================
// TESTS
// ============================================================================
