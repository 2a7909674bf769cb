//! Shared fixtures for the integration suite: a wildcard matcher and a
//! fresh in-memory-backed engine, so each scenario file states only what it
//! is actually testing.

use std::sync::Arc;

use tuplespace_core::prelude::*;

pub struct WildcardMatcher;

impl PatternMatcher<String, i64> for WildcardMatcher {
    fn try_match(&self, pattern: &String, datum: &i64) -> Option<i64> {
        if pattern == "*" {
            Some(*datum)
        } else {
            let want: i64 = pattern.parse().ok()?;
            (want == *datum).then_some(*datum)
        }
    }
}

pub type Engine = TupleSpace<
    String,
    String,
    i64,
    String,
    WildcardMatcher,
    InMemoryHistory<String, String, i64, String>,
>;

pub fn wildcard(n: usize) -> Vec<String> {
    vec!["*".to_string(); n]
}

pub async fn new_engine() -> Engine {
    let history = Arc::new(InMemoryHistory::new());
    let empty_root = history.empty_root();
    let config = EngineConfig::new(WildcardMatcher, empty_root);
    TupleSpace::new(history, config).await.unwrap()
}
