//! Text Utilities
//!
//! Token sets for dedup and MMR, and the capitalized-word scan used by the
//! signal builder and the rule-condition derivation.
//!
//! Tokens are case-folded, punctuation-stripped, and at least three
//! characters long. No stemming.

use std::collections::BTreeSet;

/// Minimum token length kept by [`token_set`]
pub const MIN_TOKEN_LEN: usize = 3;

/// Split text into the canonical token set: case-folded, punctuation
/// stripped, tokens shorter than [`MIN_TOKEN_LEN`] dropped.
pub fn token_set(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Token set over a sequence of strings (node names, for MMR)
pub fn token_set_of<'a, I>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut set = BTreeSet::new();
    for item in items {
        set.extend(token_set(item));
    }
    set
}

/// Jaccard similarity between two token sets. Empty-vs-empty is 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Single-word tokens that start with an uppercase letter, in order of
/// first appearance, case preserved. Trailing punctuation is stripped so
/// "Egor," scans as "Egor".
pub fn capitalized_words(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for word in text.split_whitespace() {
        let trimmed: String = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_string();
        if trimmed.is_empty() {
            continue;
        }
        let starts_upper = trimmed.chars().next().is_some_and(|c| c.is_uppercase());
        if starts_upper && seen.insert(trimmed.clone()) {
            out.push(trimmed);
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
