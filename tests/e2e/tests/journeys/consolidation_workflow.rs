//! Consolidation Journeys
//!
//! The off-line pass end to end: clustering, generalization, dedup and
//! absorption, the hard level cap, budgets, quarantine, cancellation.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use contextwave_e2e_tests::harness::TestDb;
use contextwave_e2e_tests::mocks::{
    episode, CancellingGeneralizer, FailingGeneralizer, ScriptedGeneralizer, TestClock,
};
use contextwave_core::text::{jaccard, token_set};
use contextwave_core::{
    CollaboratorError, ConsolidationBudget, EngineError, GeneralizationDraft, WaveEngine,
    MAX_LEVEL,
};
use tokio_util::sync::CancellationToken;

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn draft(description: &str, rule: &str, nodes: &[&str]) -> GeneralizationDraft {
    GeneralizationDraft {
        description: description.to_string(),
        rule: rule.to_string(),
        nodes: nodes.iter().map(|n| n.to_string()).collect(),
        edges: vec![],
        emotion: "resolve".to_string(),
        intensity: 1.0,
        certainty: None,
    }
}

fn write_cluster(engine: &WaveEngine, label: &str, nodes: &[&str]) -> Vec<i64> {
    (0..3)
        .map(|i| {
            engine
                .write(&episode(
                    &format!("{} episode variant {}", label, i),
                    nodes,
                    "neutral",
                ))
                .unwrap()
        })
        .collect()
}

/// One cluster of three episodes becomes one level-1 abstraction, and the
/// pass is idempotent
#[test]
fn cluster_consolidates_once() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let generalizer = Arc::new(ScriptedGeneralizer::new());
    let engine = db.engine(clock.clone()).with_generalizer(generalizer.clone());

    let members = write_cluster(&engine, "criticism", &["Egor", "criticism", "code", "feedback"]);

    let cancel = CancellationToken::new();
    let stats = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    assert_eq!(stats.clusters_seen, 1);
    assert_eq!(stats.contexts_written, 1);
    assert_eq!(stats.contexts_absorbed, 0);
    assert_eq!(stats.failures, 0);

    let all = engine.store().scan(MAX_LEVEL).unwrap();
    let abstraction = all.iter().find(|c| c.level == 1).expect("an L1 exists");
    let mut sources = abstraction.sources.clone();
    sources.sort_unstable();
    assert_eq!(sources, members);
    assert!(abstraction.intensity <= 0.8);
    assert!(abstraction.nodes.len() <= 15);
    assert!(abstraction.rule.as_deref().is_some_and(|r| !r.is_empty()));
    // Members' certainty eased once their teaching moved up
    for id in &members {
        assert!(engine.get(*id).unwrap().certainty < 1.0);
    }

    // Second pass sees nothing to do
    let again = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    assert_eq!(again.contexts_written, 0);
    assert_eq!(again.clusters_seen, 0);
    assert_eq!(generalizer.calls(), 1);
}

/// Near-duplicate generalization is absorbed into the existing abstraction
/// instead of written, and stays absorbed on later passes without another
/// generalizer call
#[test]
fn duplicate_generalization_is_absorbed() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let generalizer = Arc::new(ScriptedGeneralizer::scripted(vec![
        Ok(draft(
            "Egor criticism pattern",
            "When Egor criticizes code, engage with the substance.",
            &["Egor", "criticism", "code", "feedback"],
        )),
        Ok(draft(
            "Egor criticism pattern",
            "When Egor criticizes the code, engage the substance.",
            &["Egor", "criticism", "style", "tone"],
        )),
    ]));
    let engine = db.engine(clock.clone()).with_generalizer(generalizer.clone());

    write_cluster(&engine, "code review", &["Egor", "criticism", "code", "feedback"]);
    write_cluster(&engine, "style note", &["Egor", "criticism", "style", "tone"]);

    let cancel = CancellationToken::new();
    let stats = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    assert_eq!(stats.clusters_seen, 2);
    assert_eq!(stats.contexts_written, 1);
    assert_eq!(stats.contexts_absorbed, 1);

    // The absorbed cluster is remembered; no fresh generalizer call
    let again = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    assert_eq!(again.contexts_written, 0);
    assert_eq!(again.contexts_absorbed, 1);
    assert_eq!(generalizer.calls(), 2);
}

/// Levels climb through consolidation but never pass the cap, and no two
/// same-level abstractions end up near-duplicates
#[test]
fn level_cap_holds_through_stacked_consolidation() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    // Three distinct L1 drafts that share a node core, so the L1s
    // themselves cluster into one L2 on the level-1 sweep
    let generalizer = Arc::new(ScriptedGeneralizer::scripted(vec![
        Ok(draft(
            "mornings drift toward practice",
            "Guard the morning hours for building things.",
            &["core1", "core2", "core3", "core4"],
        )),
        Ok(draft(
            "evenings collapse into scrolling",
            "Replace the idle scroll with one message to a friend.",
            &["core1", "core2", "core3", "core4"],
        )),
        Ok(draft(
            "criticism lands better after rest",
            "Sleep before answering hard feedback.",
            &["core1", "core2", "core3", "core4"],
        )),
    ]));
    let engine = db.engine(clock.clone()).with_generalizer(generalizer.clone());

    write_cluster(&engine, "morning", &["alpha", "beta", "gamma", "delta"]);
    write_cluster(&engine, "evening", &["epsilon", "zeta", "eta", "theta"]);
    write_cluster(&engine, "feedback", &["iota", "kappa", "lambda", "sigma"]);

    let cancel = CancellationToken::new();
    let stats = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    // Three L1s on the level-0 sweep, one L2 on the level-1 sweep
    assert_eq!(stats.contexts_written, 4);

    let all = engine.store().scan(MAX_LEVEL).unwrap();
    assert!(all.iter().all(|c| c.level <= MAX_LEVEL));
    assert_eq!(all.iter().filter(|c| c.level == 1).count(), 3);
    assert_eq!(all.iter().filter(|c| c.level == 2).count(), 1);

    // Dedup property: no same-level pair of abstractions crosses 0.6
    for level in 1..=MAX_LEVEL {
        let peers: Vec<_> = all.iter().filter(|c| c.level == level).collect();
        for (i, a) in peers.iter().enumerate() {
            for b in peers.iter().skip(i + 1) {
                let ja = token_set(&format!(
                    "{} {}",
                    a.description,
                    a.rule.clone().unwrap_or_default()
                ));
                let jb = token_set(&format!(
                    "{} {}",
                    b.description,
                    b.rule.clone().unwrap_or_default()
                ));
                assert!(jaccard(&ja, &jb) <= 0.6);
            }
        }
    }

    // A further pass finds nothing: the L2 is never clustered again
    let again = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    assert_eq!(again.contexts_written, 0);
}

/// Budget exhaustion returns partial stats; the next pass resumes
#[test]
fn budget_exhaustion_is_resumable() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let engine = db
        .engine(clock.clone())
        .with_generalizer(Arc::new(ScriptedGeneralizer::new()));

    write_cluster(&engine, "first", &["alpha", "beta", "gamma", "delta"]);
    write_cluster(&engine, "second", &["epsilon", "zeta", "eta", "theta"]);

    let cancel = CancellationToken::new();
    let budget = ConsolidationBudget {
        max_clusters: Some(1),
        max_duration: None,
    };
    let first = engine.consolidate(&budget, &cancel).unwrap();
    assert!(first.budget_exhausted);
    assert_eq!(first.clusters_seen, 1);
    assert_eq!(first.contexts_written, 1);

    let second = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    assert!(!second.budget_exhausted);
    assert_eq!(second.contexts_written, 1);
}

/// Three consecutive generalizer failures quarantine the cluster signature
#[test]
fn repeated_failures_quarantine_the_cluster() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let generalizer = Arc::new(FailingGeneralizer::new(CollaboratorError::Failure(
        "model refused".to_string(),
    )));
    let engine = db.engine(clock.clone()).with_generalizer(generalizer.clone());

    write_cluster(&engine, "stubborn", &["alpha", "beta", "gamma", "delta"]);

    let cancel = CancellationToken::new();
    for _ in 0..3 {
        let stats = engine
            .consolidate(&ConsolidationBudget::unbounded(), &cancel)
            .unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.contexts_written, 0);
    }
    assert_eq!(generalizer.calls(), 3);

    // Fourth pass skips the quarantined signature entirely
    let stats = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap();
    assert_eq!(stats.quarantined_skipped, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(generalizer.calls(), 3);
}

/// Cancellation mid-cluster leaves the store exactly as it was before that
/// cluster started
#[test]
fn cancelled_consolidation_writes_nothing() {
    let db = TestDb::new();
    let clock = Arc::new(TestClock::at(t0()));
    let cancel = CancellationToken::new();
    let engine = db
        .engine(clock.clone())
        .with_generalizer(Arc::new(CancellingGeneralizer::new(cancel.clone())));

    write_cluster(&engine, "doomed", &["alpha", "beta", "gamma", "delta"]);
    let before = engine.stats().unwrap();

    let err = engine
        .consolidate(&ConsolidationBudget::unbounded(), &cancel)
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));

    let after = engine.stats().unwrap();
    assert_eq!(before.total_contexts, after.total_contexts);
    assert_eq!(after.per_level[1], 0);
}
