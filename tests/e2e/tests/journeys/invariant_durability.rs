//! Invariant Durability Journeys
//!
//! Drives the write path through accepted and rejected writes and verifies
//! every storage invariant holds after each step, with rejected writes
//! leaving the store untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use contextwave_e2e_tests::harness::TestDb;
use contextwave_e2e_tests::mocks::{episode, TestClock};
use contextwave_core::{
    ContextDraft, Edge, EngineError, Invariant, NodeToken, WaveEngine, MAX_LEVEL,
};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

/// Every storage invariant checked over the whole store
fn assert_invariants(engine: &WaveEngine) {
    let all = engine.store().scan(MAX_LEVEL).unwrap();
    let by_id: std::collections::HashMap<i64, &contextwave_core::Context> =
        all.iter().map(|c| (c.id, c)).collect();

    for ctx in &all {
        // Level bounds
        assert!(ctx.level <= MAX_LEVEL);
        // Edge endpoints are nodes
        let names: BTreeSet<&str> = ctx.nodes.iter().map(|n| n.name.as_str()).collect();
        for edge in &ctx.edges {
            assert!(names.contains(edge.source.as_str()));
            assert!(names.contains(edge.target.as_str()));
        }
        // Sources exist at strictly lower levels; none on episodes
        if !ctx.sources.is_empty() {
            assert!(ctx.level >= 1);
        }
        for source in &ctx.sources {
            let source_ctx = by_id.get(source).expect("source exists");
            assert!(source_ctx.level < ctx.level);
        }
        // Rule conditions confined to nodes (default entity set is empty)
        for token in &ctx.rule_conditions {
            assert!(names.contains(token.as_str()));
        }
        // Ranges
        assert!((0.0..=1.0).contains(&ctx.intensity));
        assert!((0.0..=1.0).contains(&ctx.certainty));
        assert!(ctx.description.chars().count() <= 300);
    }
}

#[test]
fn invariants_hold_after_every_accepted_write() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let engine = db.engine(clock);

    let mut review = episode(
        "Egor reviewed the storage layer",
        &["Egor", "storage", "review"],
        "curiosity",
    );
    review.edges = vec![Edge::new("Egor", "storage", "criticized")];
    review.rule = Some("Egor reads storage code closely.".to_string());
    review.intensity = 1.4; // clamped, not rejected
    let base = engine.write(&review).unwrap();
    assert_invariants(&engine);

    let second = engine
        .write(&episode("a second storage pass", &["storage", "tests"], "flow"))
        .unwrap();
    assert_invariants(&engine);

    let mut abstraction = episode(
        "storage reviews recur and land well",
        &["Egor", "storage"],
        "resolve",
    );
    abstraction.level = 1;
    abstraction.sources = vec![base, second];
    abstraction.rule = Some("Ship storage changes with a walkthrough for Egor.".to_string());
    engine.write(&abstraction).unwrap();
    assert_invariants(&engine);

    let stored = engine.get(base).unwrap();
    assert_eq!(stored.intensity, 1.0);
    assert_eq!(stored.rule_conditions, vec!["Egor".to_string()]);
}

#[test]
fn rejected_writes_leave_the_store_identical() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let engine = db.engine(clock);

    engine
        .write(&episode("the one good episode", &["alpha"], "joy"))
        .unwrap();
    let before = serde_json::to_string(&engine.store().scan(MAX_LEVEL).unwrap()).unwrap();

    // A parade of invalid drafts
    let mut too_deep = episode("too deep", &["alpha"], "joy");
    too_deep.level = 3;
    assert!(matches!(
        engine.write(&too_deep).unwrap_err(),
        EngineError::InvariantViolation(Invariant::LevelCap)
    ));

    let mut dangling = episode("dangling edge", &["alpha"], "joy");
    dangling.edges = vec![Edge::new("alpha", "ghost", "sent")];
    assert!(matches!(
        engine.write(&dangling).unwrap_err(),
        EngineError::InvariantViolation(Invariant::EdgeEndpoint)
    ));

    let long_description = "x".repeat(301);
    let oversized = ContextDraft {
        description: long_description,
        nodes: vec![NodeToken::bare("alpha")],
        emotion: "joy".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        engine.write(&oversized).unwrap_err(),
        EngineError::InvariantViolation(Invariant::DescriptionLength)
    ));

    let mut orphan = episode("orphan abstraction", &["alpha"], "joy");
    orphan.level = 1;
    orphan.sources = vec![4242];
    assert!(matches!(
        engine.write(&orphan).unwrap_err(),
        EngineError::InvariantViolation(Invariant::SourceLevel)
    ));

    let after = serde_json::to_string(&engine.store().scan(MAX_LEVEL).unwrap()).unwrap();
    assert_eq!(before, after);
    assert_invariants(&engine);
}

#[test]
fn source_lineage_forms_a_strict_dag() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let engine = db.engine(clock);

    let a = engine
        .write(&episode("first episode of the day", &["alpha", "beta"], "joy"))
        .unwrap();
    let b = engine
        .write(&episode("second episode of the day", &["alpha", "gamma"], "joy"))
        .unwrap();

    let mut l1 = episode("the day's generalization", &["alpha"], "resolve");
    l1.level = 1;
    l1.sources = vec![a, b];
    let g = engine.write(&l1).unwrap();

    let mut l2 = episode("a standing principle", &["alpha"], "resolve");
    l2.level = 2;
    l2.sources = vec![g];
    let p = engine.write(&l2).unwrap();

    // Strict level decrease along every source edge
    let stored = engine.get(p).unwrap();
    assert_eq!(stored.sources, vec![g]);
    assert_eq!(engine.get(g).unwrap().sources, vec![a, b]);
    assert_invariants(&engine);

    // A same-level source is refused even at the top
    let mut sideways = episode("an equally standing principle", &["alpha"], "resolve");
    sideways.level = 2;
    sideways.sources = vec![p];
    assert!(matches!(
        engine.write(&sideways).unwrap_err(),
        EngineError::InvariantViolation(Invariant::SourceLevel)
    ));
}

#[test]
fn purge_respects_lineage_and_cascades_indexes() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let engine = db.engine(clock);

    let a = engine
        .write(&episode("remembered breakfast", &["kitchen", "eggs"], "warmth"))
        .unwrap();
    let mut l1 = episode("breakfasts are good anchors", &["kitchen"], "resolve");
    l1.level = 1;
    l1.sources = vec![a];
    engine.write(&l1).unwrap();

    // The referenced episode cannot be purged alone
    assert!(matches!(
        engine.purge(|c| c.id == a).unwrap_err(),
        EngineError::InvariantViolation(Invariant::PurgeReferenced)
    ));

    // The whole lineage can; indexes cascade
    assert_eq!(engine.purge(|_| true).unwrap(), 2);
    assert_eq!(engine.stats().unwrap().total_contexts, 0);
    assert!(engine.store().ids_with_node("kitchen").unwrap().is_empty());
    assert!(matches!(
        engine.get(a).unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[test]
fn stats_track_levels_and_consolidation_debt() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let engine = db.engine(clock);

    let a = engine
        .write(&episode("one episode about music", &["music", "piano"], "awe"))
        .unwrap();
    engine
        .write(&episode("another episode about music", &["music", "vinyl"], "awe"))
        .unwrap();
    let mut l1 = episode("music keeps coming back", &["music"], "resolve");
    l1.level = 1;
    l1.sources = vec![a];
    engine.write(&l1).unwrap();

    let stats = engine.stats().unwrap();
    assert_eq!(stats.total_contexts, 3);
    assert_eq!(stats.per_level, [2, 1, 0]);
    // One episode consolidated away, one still open, the L1 itself open
    assert_eq!(stats.unconsolidated_per_level, [1, 1, 0]);
    assert!(stats.oldest.is_some());
    assert!(stats.newest.is_some());
}
