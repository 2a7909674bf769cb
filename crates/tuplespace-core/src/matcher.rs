//! The matcher driver (spec component F): runs a pluggable pattern matcher
//! over candidate data tuples.
//!
//! Both entry points take their per-channel candidate lists already ordered
//! by the caller (the engine in live mode, the replay engine in replay
//! mode) — this module never shuffles anything itself. Live-mode shuffling
//! and replay-mode steering both live one layer up, so the matching
//! algorithm itself stays deterministic given its inputs.

use crate::model::{Datum, WaitingContinuation};

/// A matcher is purely functional: `(pattern, datum) -> Option<rewritten>`,
/// with no side effects on the store. The engine never inspects patterns
/// itself.
pub trait PatternMatcher<P, A>: Send + Sync {
    fn try_match(&self, pattern: &P, datum: &A) -> Option<A>;
}

/// One datum available on a channel, tagged with its position in that
/// channel's stored list. A negative-sentinel-free design: the producer's
/// own in-flight datum (not yet stored) is represented separately by the
/// caller and given `index = None`, so downstream removal logic can tell
/// "already stored, remove by index" from "this call's own datum, never
/// stored".
#[derive(Debug, Clone)]
pub struct IndexedDatum<A> {
    pub index: Option<usize>,
    pub datum: Datum<A>,
}

/// One successfully matched channel/pattern pair.
#[derive(Debug, Clone)]
pub struct ConsumeCandidate<C, A> {
    pub channel: C,
    pub datum: Datum<A>,
    pub removed_datum: A,
    pub index: Option<usize>,
}

/// A complete match on the produce side: which continuation fired, at which
/// index in its channel tuple's list, and the per-channel data it consumed.
#[derive(Debug, Clone)]
pub struct ProduceCandidate<C, P, A, K> {
    pub channels: Vec<C>,
    pub continuation: WaitingContinuation<P, K>,
    pub cont_index: usize,
    pub data_candidates: Vec<ConsumeCandidate<C, A>>,
}

/// Consume-side extraction: for each `(channel, pattern)` pair in input
/// order, scans its candidate list (already shuffled/ordered by the caller)
/// for the first datum the matcher accepts. Any pair with no acceptable
/// candidate aborts extraction for the entire tuple.
pub fn extract_data_candidates<C, P, A, M>(
    matcher: &M,
    channels: &[C],
    patterns: &[P],
    candidates_by_position: &[Vec<IndexedDatum<A>>],
) -> Option<Vec<ConsumeCandidate<C, A>>>
where
    C: Clone,
    A: Clone,
    M: PatternMatcher<P, A>,
{
    let mut result = Vec::with_capacity(patterns.len());
    for (i, pattern) in patterns.iter().enumerate() {
        let candidates = candidates_by_position.get(i)?;
        let mut found = None;
        for indexed in candidates {
            if let Some(rewritten) = matcher.try_match(pattern, &indexed.datum.a) {
                found = Some(ConsumeCandidate {
                    channel: channels.get(i)?.clone(),
                    datum: indexed.datum.clone(),
                    removed_datum: rewritten,
                    index: indexed.index,
                });
                break;
            }
        }
        result.push(found?);
    }
    Some(result)
}

/// Produce-side extraction: scans candidate continuations (already
/// shuffled/ordered, paired with their original index) on the joined
/// channel tuple; for each, attempts data extraction across all of its
/// channels via `fetch_candidates`. Returns the first continuation that
/// fully matches, or `None`.
pub fn extract_first_match<C, P, A, K, M>(
    matcher: &M,
    channels: &[C],
    continuations: &[(usize, WaitingContinuation<P, K>)],
    fetch_candidates: impl Fn(&WaitingContinuation<P, K>) -> Vec<Vec<IndexedDatum<A>>>,
) -> Option<ProduceCandidate<C, P, A, K>>
where
    C: Clone,
    P: Clone,
    A: Clone,
    K: Clone,
    M: PatternMatcher<P, A>,
{
    for (cont_index, wc) in continuations {
        let candidates_by_position = fetch_candidates(wc);
        if let Some(data_candidates) =
            extract_data_candidates(matcher, channels, &wc.patterns, &candidates_by_position)
        {
            return Some(ProduceCandidate {
                channels: channels.to_vec(),
                continuation: wc.clone(),
                cont_index: *cont_index,
                data_candidates,
            });
        }
    }
    None
}
