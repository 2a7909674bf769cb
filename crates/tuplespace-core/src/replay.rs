//! The replay engine (spec component H): wraps a live engine with an
//! auxiliary rigged log, and checks that every `produce`/`consume` reissued
//! against it commits exactly the same `COMM` the original session recorded.
//!
//! Live-mode candidate selection is randomized (`engine::shuffle_indexed`);
//! true RNG-free steering would require threading the rigged multimap into
//! the matcher driver's candidate ordering itself. This wrapper instead
//! validates *after* each call that its outcome is accounted for in the rig.
//!
//! A rigged `COMM` is one obligation shared by both the consume reference
//! and every produce reference it names — whichever side's replayed call
//! actually observes the match resolves the *same* obligation, so it is
//! tracked once in a single pool and only indexed twice, never counted
//! twice. A call that registers without matching (returns `None`) is the
//! ordinary path for one half of a join and is only a divergence if its
//! reference never appears anywhere in the rigged log at all — a call the
//! original session never made. A call that matches (`Some`) must resolve
//! an outstanding obligation for its own reference, or the match itself is
//! the divergence. Whatever obligations are left unresolved once replay is
//! done are caught by `check_replay_data`.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::engine::TupleSpace;
use crate::error::TupleSpaceError;
use crate::hash::CanonicalEncode;
use crate::history::HistoryRepository;
use crate::matcher::PatternMatcher;
use crate::model::{ChannelsHash, CommEvent, Consume, ContentHash, Event, Produce, ProduceResult};

#[derive(Default)]
struct ReplayState {
    /// One slot per rigged `COMM`; resolved (`None`) once either side's
    /// replayed call accounts for it.
    obligations: Vec<Option<CommEvent>>,
    by_consume: HashMap<ChannelsHash, Vec<usize>>,
    by_produce: HashMap<ContentHash, Vec<usize>>,
    /// Every reference the original session ever produced or consumed,
    /// whether or not it matched immediately — a replayed call whose
    /// reference is absent here was never part of the recorded session.
    known_consume_refs: HashSet<ChannelsHash>,
    known_produce_refs: HashSet<ContentHash>,
}

impl ReplayState {
    fn rig(&mut self, log: Vec<Event>) {
        for event in log {
            match event {
                Event::Produce(p) => {
                    self.known_produce_refs.insert(p.reference);
                }
                Event::Consume(c) => {
                    self.known_consume_refs.insert(c.reference);
                }
                Event::Comm(comm) => {
                    self.known_consume_refs.insert(comm.consume.reference);
                    for produce in &comm.produces {
                        self.known_produce_refs.insert(produce.reference);
                    }

                    let idx = self.obligations.len();
                    self.by_consume
                        .entry(comm.consume.reference)
                        .or_default()
                        .push(idx);
                    for produce in &comm.produces {
                        self.by_produce.entry(produce.reference).or_default().push(idx);
                    }
                    self.obligations.push(Some(comm));
                }
            }
        }
    }

    /// Resolves the first outstanding obligation rigged for `consume_ref`,
    /// shared with whatever produce references participated in the same
    /// `COMM`. Errors if the replayed match has no outstanding counterpart.
    fn resolve_consume(&mut self, consume_ref: ChannelsHash) -> Result<(), TupleSpaceError> {
        let indices = self.by_consume.get(&consume_ref).cloned().unwrap_or_default();
        for idx in indices {
            if self.obligations[idx].is_some() {
                self.obligations[idx] = None;
                return Ok(());
            }
        }
        Err(TupleSpaceError::replay_divergence(format!(
            "consume {consume_ref} matched but no rigged COMM was outstanding for it"
        )))
    }

    /// Symmetric to `resolve_consume`, keyed by produce reference.
    fn resolve_produce(&mut self, produce_ref: ContentHash) -> Result<(), TupleSpaceError> {
        let indices = self.by_produce.get(&produce_ref).cloned().unwrap_or_default();
        for idx in indices {
            if self.obligations[idx].is_some() {
                self.obligations[idx] = None;
                return Ok(());
            }
        }
        Err(TupleSpaceError::replay_divergence(format!(
            "produce {produce_ref} matched but no rigged COMM was outstanding for it"
        )))
    }

    fn residual_count(&self) -> usize {
        self.obligations.iter().filter(|o| o.is_some()).count()
    }
}

/// Wraps a `TupleSpace` with a rigged event log for deterministic replay.
pub struct ReplayTupleSpace<C, P, A, K, M, H>
where
    H: HistoryRepository<C, P, A, K>,
{
    inner: TupleSpace<C, P, A, K, M, H>,
    state: Mutex<ReplayState>,
}

impl<C, P, A, K, M, H> ReplayTupleSpace<C, P, A, K, M, H>
where
    C: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    P: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    A: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    K: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    M: PatternMatcher<P, A> + Send + Sync + 'static,
    H: HistoryRepository<C, P, A, K> + Send + Sync + 'static,
    H::Reader: Send + Sync + 'static,
{
    pub fn new(inner: TupleSpace<C, P, A, K, M, H>) -> Self {
        ReplayTupleSpace {
            inner,
            state: Mutex::new(ReplayState::default()),
        }
    }

    pub fn inner(&self) -> &TupleSpace<C, P, A, K, M, H> {
        &self.inner
    }

    /// Loads a previously recorded event log to replay against.
    pub fn rig(&self, log: Vec<Event>) {
        self.state.lock().rig(log);
    }

    pub async fn replay_consume(
        &self,
        channels: Vec<C>,
        patterns: Vec<P>,
        k: K,
        persist: bool,
        peeks: std::collections::BTreeSet<usize>,
    ) -> Result<Option<ProduceResult<C, A, K>>, TupleSpaceError> {
        let consume_ref = Consume::new(&channels, &patterns, &k, persist);
        let result = self
            .inner
            .consume(channels, patterns, k, persist, peeks)
            .await?;

        let mut state = self.state.lock();
        match &result {
            Some(_) => state.resolve_consume(consume_ref.reference)?,
            None => {
                if !state.known_consume_refs.contains(&consume_ref.reference) {
                    return Err(TupleSpaceError::replay_divergence(format!(
                        "consume {} does not correspond to anything in the recorded session",
                        consume_ref.reference
                    )));
                }
            }
        }
        Ok(result)
    }

    pub async fn replay_produce(
        &self,
        channel: C,
        data: A,
        persist: bool,
    ) -> Result<Option<ProduceResult<C, A, K>>, TupleSpaceError> {
        let produce_ref = Produce::new(&channel, &data, persist);
        let result = self.inner.produce(channel, data, persist).await?;

        let mut state = self.state.lock();
        match &result {
            Some(_) => state.resolve_produce(produce_ref.reference)?,
            None => {
                if !state.known_produce_refs.contains(&produce_ref.reference) {
                    return Err(TupleSpaceError::replay_divergence(format!(
                        "produce {} does not correspond to anything in the recorded session",
                        produce_ref.reference
                    )));
                }
            }
        }
        Ok(result)
    }

    /// Asserts that every rigged `COMM` obligation was accounted for by a
    /// replayed call. Any residual entry signals divergence.
    pub fn check_replay_data(&self) -> Result<(), TupleSpaceError> {
        let state = self.state.lock();
        let residual = state.residual_count();
        if residual > 0 {
            return Err(TupleSpaceError::replay_divergence(format!(
                "{residual} rigged COMM event(s) were never replayed"
            )));
        }
        Ok(())
    }
}
