//! Property-style checks over the universal invariants: join/continuation
//! symmetry, produce/consume duality, soft-checkpoint round-tripping, and
//! persistence across repeated matches. Each property drives the engine
//! through `tokio_test::block_on` so it can run under plain `proptest!`.

mod common;

use std::collections::BTreeSet;

use common::{new_engine, wildcard};
use proptest::prelude::*;
use tuplespace_core::prelude::*;

proptest! {
    /// Invariant 1: a channel tuple with a registered waiting continuation
    /// has that tuple in every member channel's join set, and vice versa.
    #[test]
    fn join_continuation_symmetry(n_channels in 1usize..5) {
        tokio_test::block_on(async {
            let engine = new_engine().await;
            let channels: Vec<String> = (0..n_channels).map(|i| format!("c{i}")).collect();

            engine
                .consume(channels.clone(), wildcard(n_channels), "k".to_string(), false, BTreeSet::new())
                .await
                .unwrap();

            for c in &channels {
                let joins = engine.get_joins(c).await.unwrap();
                prop_assert!(joins.iter().any(|cs| cs == &channels));
            }
            let conts = engine.get_waiting_continuations(&channels).await.unwrap();
            prop_assert_eq!(conts.len(), 1);
            Ok(())
        })?;
    }

    /// Invariant 2: produce then consume on the same tuple with a
    /// universally-matching pattern returns the produced datum and empties
    /// the channel (duality), for any payload value.
    #[test]
    fn produce_consume_duality(payload in any::<i64>()) {
        tokio_test::block_on(async {
            let engine = new_engine().await;
            let produced = engine.produce("c".to_string(), payload, false).await.unwrap();
            prop_assert!(produced.is_none());

            let consumed = engine
                .consume(vec!["c".to_string()], wildcard(1), "k".to_string(), false, BTreeSet::new())
                .await
                .unwrap()
                .expect("a waiting datum with a universal pattern must match");
            prop_assert_eq!(consumed.results[0].data, payload);
            prop_assert!(engine.get_data(&"c".to_string()).await.unwrap().is_empty());
            Ok(())
        })?;
    }

    /// Invariant 4: a soft-checkpoint round trip restores the hot store and
    /// event log to their exact pre-checkpoint contents.
    #[test]
    fn soft_checkpoint_round_trip(values in prop::collection::vec(any::<i64>(), 1..6)) {
        tokio_test::block_on(async {
            let engine = new_engine().await;
            for v in &values {
                engine.produce("c".to_string(), *v, false).await.unwrap();
            }
            let before = engine.get_data(&"c".to_string()).await.unwrap();
            let before_map_len = before.len();

            let checkpoint = engine.create_soft_checkpoint().await.unwrap();
            // session log and hot store are logically drained now
            prop_assert!(engine.get_data(&"c".to_string()).await.unwrap().len() == before_map_len);

            // mutate further so revert has something to actually undo
            engine.produce("c".to_string(), 999, false).await.unwrap();
            prop_assert_eq!(engine.get_data(&"c".to_string()).await.unwrap().len(), before_map_len + 1);

            engine.revert_to_soft_checkpoint(checkpoint).await.unwrap();
            let after = engine.get_data(&"c".to_string()).await.unwrap();
            prop_assert_eq!(after.len(), before_map_len);
            for (a, b) in after.iter().zip(before.iter()) {
                prop_assert_eq!(a.a, b.a);
            }
            Ok(())
        })?;
    }

    /// Invariant 7: a persistent datum survives an arbitrary number of
    /// non-persistent consume matches against it.
    #[test]
    fn persistent_datum_survives_repeated_matches(repeats in 1usize..8) {
        tokio_test::block_on(async {
            let engine = new_engine().await;
            engine.produce("c".to_string(), 1, true).await.unwrap();

            for i in 0..repeats {
                let result = engine
                    .consume(vec!["c".to_string()], wildcard(1), format!("k{i}"), false, BTreeSet::new())
                    .await
                    .unwrap();
                prop_assert!(result.is_some());
            }
            prop_assert_eq!(engine.get_data(&"c".to_string()).await.unwrap().len(), 1);
            Ok(())
        })?;
    }

    /// Reset idempotence: two successive `clear()` calls and a single
    /// `clear()` leave the engine in the same observable state.
    #[test]
    fn reset_is_idempotent(payload in any::<i64>()) {
        tokio_test::block_on(async {
            let engine = new_engine().await;
            engine.produce("c".to_string(), payload, true).await.unwrap();

            engine.clear().await.unwrap();
            engine.clear().await.unwrap();
            let double = engine.get_data(&"c".to_string()).await.unwrap();

            let engine2 = new_engine().await;
            engine2.produce("c".to_string(), payload, true).await.unwrap();
            engine2.clear().await.unwrap();
            let single = engine2.get_data(&"c".to_string()).await.unwrap();

            prop_assert_eq!(double.len(), single.len());
            prop_assert!(double.is_empty());
            Ok(())
        })?;
    }
}
