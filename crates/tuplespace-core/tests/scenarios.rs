//! Concrete scenarios from the engine's testable-properties catalogue:
//! basic join matching, persistence, peek, install-once, replay, and
//! lock-induced serialization under genuine concurrency.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{new_engine, wildcard};
use tuplespace_core::prelude::*;

/// S1: a two-channel join registers, then fires once both sides arrive.
#[tokio::test]
async fn s1_basic_join_match() {
    let engine = new_engine().await;

    let none = engine
        .consume(
            vec!["c1".to_string(), "c2".to_string()],
            wildcard(2),
            "k".to_string(),
            false,
            BTreeSet::new(),
        )
        .await
        .unwrap();
    assert!(none.is_none());

    let first = engine.produce("c1".to_string(), 1, false).await.unwrap();
    assert!(first.is_none(), "lone producer on one leg of a join must not fire");

    let second = engine.produce("c2".to_string(), 2, false).await.unwrap();
    let result = second.expect("both legs present, join must fire");

    assert_eq!(result.cont_result.continuation, "k");
    assert!(!result.cont_result.persist);
    assert_eq!(result.results.len(), 2);
    for r in &result.results {
        assert!(r.removed);
        assert!(!r.persist);
    }

    assert!(engine.get_data(&"c1".to_string()).await.unwrap().is_empty());
    assert!(engine.get_data(&"c2".to_string()).await.unwrap().is_empty());
    assert!(engine
        .get_waiting_continuations(&["c1".to_string(), "c2".to_string()])
        .await
        .unwrap()
        .is_empty());
}

/// S2: a persistent producer survives any number of matches.
#[tokio::test]
async fn s2_persistent_producer_survives_repeated_matches() {
    let engine = new_engine().await;

    let produced = engine.produce("c".to_string(), 9, true).await.unwrap();
    assert!(produced.is_none());

    let first = engine
        .consume(vec!["c".to_string()], wildcard(1), "k1".to_string(), false, BTreeSet::new())
        .await
        .unwrap()
        .expect("persistent datum matches immediately");
    assert_eq!(first.results[0].data, 9);
    assert!(!first.results[0].removed);
    assert!(first.results[0].persist);

    let still_there = engine.get_data(&"c".to_string()).await.unwrap();
    assert_eq!(still_there.len(), 1);

    let second = engine
        .consume(vec!["c".to_string()], wildcard(1), "k2".to_string(), false, BTreeSet::new())
        .await
        .unwrap();
    assert!(second.is_some(), "a persistent datum matches again");
}

/// S3: peek retains the matched datum at the peeked index only.
#[tokio::test]
async fn s3_peek_retains_only_the_peeked_channel() {
    let engine = new_engine().await;

    let mut peeks = BTreeSet::new();
    peeks.insert(0usize);
    engine
        .consume(
            vec!["c1".to_string(), "c2".to_string()],
            wildcard(2),
            "k".to_string(),
            false,
            peeks,
        )
        .await
        .unwrap();

    engine.produce("c1".to_string(), 1, false).await.unwrap();
    let result = engine
        .produce("c2".to_string(), 2, false)
        .await
        .unwrap()
        .expect("join completes on the second produce");

    assert!(!result.results[0].removed, "peeked channel must not be removed");
    assert!(result.results[1].removed, "non-peeked channel is removed as usual");

    let c1_data = engine.get_data(&"c1".to_string()).await.unwrap();
    assert_eq!(c1_data.len(), 1);
    assert_eq!(c1_data[0].a, 1);
    assert!(engine.get_data(&"c2".to_string()).await.unwrap().is_empty());
}

/// S4: install is startup-only; a subsequent install over an existing
/// matching datum is a permanent configuration error.
#[tokio::test]
async fn s4_install_only_at_startup() {
    let engine = new_engine().await;

    let installed = engine
        .install(vec!["c".to_string()], wildcard(1), "k".to_string())
        .await
        .unwrap();
    assert!(installed.is_none());

    let matched = engine.produce("c".to_string(), 1, false).await.unwrap();
    assert!(matched.is_some(), "produce matches the installed continuation");

    // installed continuations are persistent and remain registered
    let matched_again = engine.produce("c".to_string(), 2, false).await.unwrap();
    assert!(matched_again.is_some());

    // now there's a datum sitting unmatched on another channel; installing
    // a continuation that would immediately match it is an error.
    engine.produce("d".to_string(), 7, false).await.unwrap();
    let err = engine
        .install(vec!["d".to_string()], wildcard(1), "k2".to_string())
        .await
        .unwrap_err();
    assert_eq!(err, TupleSpaceError::InstallAfterStartup);
}

/// S4b: an install survives `reset` by being reinstalled against the fresh
/// history root.
#[tokio::test]
async fn s4b_install_is_reapplied_across_reset() {
    let engine = new_engine().await;
    engine
        .install(vec!["c".to_string()], wildcard(1), "k".to_string())
        .await
        .unwrap();

    engine.clear().await.unwrap();

    let matched = engine.produce("c".to_string(), 5, false).await.unwrap();
    assert!(matched.is_some(), "install must be reinstated after reset");
}

/// S5: replaying a recorded log against a fresh engine succeeds when the
/// same calls are reissued, and diverges on an alternative produce.
#[tokio::test]
async fn s5_replay_fidelity_and_divergence() {
    let engine = new_engine().await;
    engine
        .consume(
            vec!["c1".to_string(), "c2".to_string()],
            wildcard(2),
            "k".to_string(),
            false,
            BTreeSet::new(),
        )
        .await
        .unwrap();
    engine.produce("c1".to_string(), 1, false).await.unwrap();
    engine.produce("c2".to_string(), 2, false).await.unwrap();

    let (_root, log) = engine.create_checkpoint().await.unwrap();
    engine.clear().await.unwrap();

    let replay = ReplayTupleSpace::new(engine);
    replay.rig(log.clone());

    replay
        .replay_consume(
            vec!["c1".to_string(), "c2".to_string()],
            wildcard(2),
            "k".to_string(),
            false,
            BTreeSet::new(),
        )
        .await
        .unwrap();
    replay.replay_produce("c1".to_string(), 1, false).await.unwrap();
    replay.replay_produce("c2".to_string(), 2, false).await.unwrap();
    replay.check_replay_data().unwrap();

    // a fresh divergent session: same consume, but a produce with a
    // different payload has no corresponding rigged COMM.
    let engine2 = common::new_engine().await;
    engine2
        .consume(
            vec!["c1".to_string(), "c2".to_string()],
            wildcard(2),
            "k".to_string(),
            false,
            BTreeSet::new(),
        )
        .await
        .unwrap();
    let replay2 = ReplayTupleSpace::new(engine2);
    replay2.rig(log);
    replay2
        .replay_consume(
            vec!["c1".to_string(), "c2".to_string()],
            wildcard(2),
            "k".to_string(),
            false,
            BTreeSet::new(),
        )
        .await
        .unwrap();
    let err = replay2.replay_produce("c1".to_string(), 99, false).await.unwrap_err();
    assert!(matches!(err, TupleSpaceError::ReplayDivergence(_)));
}

/// S6: two concurrent producers racing to complete the same join each run
/// under the engine's own locking; exactly one observes the match.
#[tokio::test]
async fn s6_concurrent_producers_serialize_on_the_shared_join() {
    let engine = Arc::new(new_engine().await);
    engine
        .consume(
            vec!["a".to_string(), "b".to_string()],
            wildcard(2),
            "k".to_string(),
            false,
            BTreeSet::new(),
        )
        .await
        .unwrap();

    let e1 = engine.clone();
    let e2 = engine.clone();
    let t1 = tokio::spawn(async move { e1.produce("a".to_string(), 1, false).await.unwrap() });
    let t2 = tokio::spawn(async move { e2.produce("b".to_string(), 2, false).await.unwrap() });

    let (r1, r2) = tokio::join!(t1, t2);
    let (r1, r2) = (r1.unwrap(), r2.unwrap());

    let matched_count = [&r1, &r2].iter().filter(|r| r.is_some()).count();
    assert_eq!(matched_count, 1, "exactly one producer observes the join firing");

    assert!(engine
        .get_waiting_continuations(&["a".to_string(), "b".to_string()])
        .await
        .unwrap()
        .is_empty());
}
