//! Core data model: data, continuations, structural references and events.

use std::collections::BTreeSet;

use crate::hash::{hash_fields, CanonicalEncode, StableHash};

/// Structural reference to a `produce` call, built from `(channel, data,
/// persist)`. Debug/Clone/Copy/PartialEq/Eq/Hash so it is directly usable as
/// a map key; structural rather than identity-based, so replay across
/// process restarts and store rebuilds remains meaningful.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub StableHash);

/// Structural reference to a `consume`/`install` call, built from
/// `(channels, patterns, k, persist)`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelsHash(pub StableHash);

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ChannelsHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `produce` call, identified structurally by `ContentHash`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Produce {
    pub reference: ContentHash,
}

impl Produce {
    pub fn new<C, A>(channel: &C, data: &A, persist: bool) -> Self
    where
        C: CanonicalEncode,
        A: CanonicalEncode,
    {
        let channel_bytes = channel.canonical_encode();
        let data_bytes = data.canonical_encode();
        let persist_bytes = [persist as u8];
        let reference = ContentHash(hash_fields(&[&channel_bytes, &data_bytes, &persist_bytes]));
        Produce { reference }
    }
}

/// A `consume`/`install` call, identified structurally by `ChannelsHash`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Consume {
    pub reference: ChannelsHash,
}

impl Consume {
    pub fn new<C, P, K>(channels: &[C], patterns: &[P], k: &K, persist: bool) -> Self
    where
        C: CanonicalEncode,
        P: CanonicalEncode,
        K: CanonicalEncode,
    {
        let channels_bytes = channels.to_vec().canonical_encode();
        let patterns_bytes = patterns.to_vec().canonical_encode();
        let k_bytes = k.canonical_encode();
        let persist_bytes = [persist as u8];
        let reference = ChannelsHash(hash_fields(&[
            &channels_bytes,
            &patterns_bytes,
            &k_bytes,
            &persist_bytes,
        ]));
        Consume { reference }
    }
}

/// A produced payload together with its persistence flag and originating
/// `Produce` reference.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Datum<A> {
    pub a: A,
    pub persist: bool,
    pub source: Produce,
}

impl<A> Datum<A> {
    pub fn new(a: A, persist: bool, source: Produce) -> Self {
        Datum { a, persist, source }
    }
}

/// One continuation awaiting data on a tuple of channels.
///
/// `peeks` is the subset of channel indices whose matched datum must be
/// retained even on a non-persistent match.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct WaitingContinuation<P, K> {
    pub patterns: Vec<P>,
    pub continuation: K,
    pub persist: bool,
    pub peeks: BTreeSet<usize>,
    pub source: Consume,
}

impl<P, K> WaitingContinuation<P, K> {
    pub fn new(
        patterns: Vec<P>,
        continuation: K,
        persist: bool,
        peeks: BTreeSet<usize>,
        source: Consume,
    ) -> Self {
        WaitingContinuation {
            patterns,
            continuation,
            persist,
            peeks,
            source,
        }
    }
}

/// The continuation half of a match result, common to `consume` and
/// `produce` outcomes.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ContResult<K> {
    pub continuation: K,
    pub persist: bool,
    pub channels_len: usize,
    pub peek: bool,
}

/// One channel's contribution to a match result.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct MatchResult<C, A> {
    pub channel: C,
    pub data: A,
    /// `true` when the datum was removed from the store as part of this
    /// match (i.e. it will not be found by a subsequent read).
    pub removed: bool,
    pub persist: bool,
}

/// Result of a successful `consume` or `produce` match. `ProduceResult` is
/// the same shape, per §6.1.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ConsumeResult<C, A, K> {
    pub cont_result: ContResult<K>,
    pub results: Vec<MatchResult<C, A>>,
}

pub type ProduceResult<C, A, K> = ConsumeResult<C, A, K>;

/// A logical communication event: the consume that fired, the produces whose
/// data it consumed, which indices were peeked, and the repeat count of each
/// matched produce at the time of the match (carried for deterministic
/// replay accounting).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct CommEvent {
    pub consume: Consume,
    pub produces: Vec<Produce>,
    pub peeks: BTreeSet<usize>,
    pub produce_counters: Vec<(Produce, u64)>,
}

/// A logged event: a registration that did not immediately match, or a
/// completed communication.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub enum Event {
    Produce(Produce),
    Consume(Consume),
    Comm(CommEvent),
}

/// A pre-registered, always-persistent continuation re-applied on every
/// reset.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Install<P, K> {
    pub patterns: Vec<P>,
    pub continuation: K,
}
