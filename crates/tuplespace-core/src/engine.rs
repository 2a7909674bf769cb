//! The tuplespace engine (spec component G): `produce`/`consume`/`install`,
//! commit, checkpoint and reset, wired atop the hot store, the event log,
//! the two-step hash lock and the matcher driver.
//!
//! The store is held behind a `tokio::sync::RwLock`: every regular
//! operation takes a shared read guard for its whole duration (so disjoint
//! operations still run concurrently), while `reset`/`clear`/checkpointing
//! take the exclusive write guard to perform the store swap. The per-channel
//! `HashLockManager` then serializes operations that actually touch
//! overlapping channels, exactly as called for in the concurrency model.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::SliceRandom;

use crate::config::{EngineConfig, LockCleanupPolicy};
use crate::error::TupleSpaceError;
use crate::hash::{hash_channel_tuple, stable_hash, CanonicalEncode, StableHash};
use crate::history::{HistoryDelta, HistoryReader, HistoryRepository};
use crate::lock::HashLockManager;
use crate::matcher::{extract_data_candidates, extract_first_match, IndexedDatum, PatternMatcher};
use crate::model::{
    ChannelsHash, CommEvent, ConsumeResult, ContResult, ContentHash, Consume, Datum, Event,
    Install, MatchResult, Produce, ProduceResult, WaitingContinuation,
};
use crate::metrics;
use crate::store::{CacheSnapshot, HotStore};
use crate::SessionLog;

/// `(hotCacheSnapshot, eventLog, produceCounter)`, revertible within the
/// process.
#[derive(Clone)]
pub struct SoftCheckpoint<C, P, A, K> {
    pub snapshot: CacheSnapshot<C, P, A, K>,
    pub events: Vec<Event>,
    pub produce_counter: HashMap<ContentHash, u64>,
}

struct InstallEntry<C, P, K> {
    channels: Vec<C>,
    install: Install<P, K>,
}

struct EngineState<C, P, A, K, R> {
    root: StableHash,
    store: Arc<HotStore<C, P, A, K, R>>,
}

/// `TupleSpace<C, P, A, K, M>` generalized over the history repository
/// implementation `H`; constructed from a `HistoryRepository` and an
/// `EngineConfig`.
pub struct TupleSpace<C, P, A, K, M, H>
where
    H: HistoryRepository<C, P, A, K>,
{
    config: EngineConfig<M>,
    repository: Arc<H>,
    state: tokio::sync::RwLock<EngineState<C, P, A, K, H::Reader>>,
    log: parking_lot::Mutex<SessionLog>,
    lock_manager: HashLockManager,
    installs: DashMap<ChannelsHash, InstallEntry<C, P, K>>,
}

fn shuffle_indexed<A>(items: &mut [IndexedDatum<A>]) {
    let mut rng = rand::thread_rng();
    items.shuffle(&mut rng);
}

fn shuffle_pairs<T>(items: &mut [T]) {
    let mut rng = rand::thread_rng();
    items.shuffle(&mut rng);
}

fn channels_equal<C: CanonicalEncode>(a: &C, b: &C) -> bool {
    stable_hash(a) == stable_hash(b)
}

fn to_indexed<A: Clone>(data: Vec<Datum<A>>) -> Vec<IndexedDatum<A>> {
    data.into_iter()
        .enumerate()
        .map(|(i, datum)| IndexedDatum {
            index: Some(i),
            datum,
        })
        .collect()
}

impl<C, P, A, K, M, H> TupleSpace<C, P, A, K, M, H>
where
    C: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    P: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    A: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    K: CanonicalEncode + Clone + std::fmt::Debug + Send + Sync + 'static,
    M: PatternMatcher<P, A> + Send + Sync + 'static,
    H: HistoryRepository<C, P, A, K> + Send + Sync + 'static,
    H::Reader: Send + Sync + 'static,
{
    pub async fn new(repository: Arc<H>, config: EngineConfig<M>) -> Result<Self, TupleSpaceError> {
        let root = repository.empty_root();
        let reader = repository.get_history_reader(root).await?;
        let store = Arc::new(HotStore::new(Arc::new(reader)));
        Ok(TupleSpace {
            config,
            repository,
            state: tokio::sync::RwLock::new(EngineState { root, store }),
            log: parking_lot::Mutex::new(SessionLog::new()),
            lock_manager: HashLockManager::new(),
            installs: DashMap::new(),
        })
    }

    pub fn current_root(&self) -> StableHash {
        // best-effort synchronous read; used only for diagnostics/tests.
        self.state
            .try_read()
            .map(|guard| guard.root)
            .unwrap_or(self.config.empty_root)
    }

    fn validate_tuple(&self, channels: &[C], patterns: &[P], peeks: &BTreeSet<usize>) -> Result<(), TupleSpaceError> {
        if channels.is_empty() {
            return Err(TupleSpaceError::invalid_argument("channels must not be empty"));
        }
        if channels.len() != patterns.len() {
            return Err(TupleSpaceError::invalid_argument(
                "channels and patterns length mismatch",
            ));
        }
        if let Some(&max_idx) = peeks.iter().max() {
            if max_idx >= channels.len() {
                return Err(TupleSpaceError::invalid_argument(
                    "peek index out of range of channels",
                ));
            }
        }
        Ok(())
    }

    pub async fn consume(
        &self,
        channels: Vec<C>,
        patterns: Vec<P>,
        k: K,
        persist: bool,
        peeks: BTreeSet<usize>,
    ) -> Result<Option<ConsumeResult<C, A, K>>, TupleSpaceError> {
        self.validate_tuple(&channels, &patterns, &peeks)?;

        let span = tracing::debug_span!("tuplespace.consume", channels = channels.len());
        let _enter = span.enter();
        let start = std::time::Instant::now();

        let consume_ref = Consume::new(&channels, &patterns, &k, persist);
        let lock_key = hash_channel_tuple(&channels);

        let state_guard = self.state.read().await;
        let store = state_guard.store.clone();

        let outcome = self
            .lock_manager
            .with_two_step_lock::<_, TupleSpaceError, _, _>(
                vec![lock_key],
                || async { Ok(vec![]) },
                || {
                    self.consume_locked(
                        &channels,
                        &patterns,
                        &k,
                        persist,
                        &peeks,
                        consume_ref.clone(),
                        &store,
                    )
                },
            )
            .await?;

        drop(state_guard);

        metrics::increment(&self.config, metrics::COMM_CONSUME);
        metrics::record_timing(&self.config, metrics::COMM_CONSUME_TIME, start.elapsed());

        if outcome.is_some() {
            tracing::info!(consume = %consume_ref.reference, "consume matched");
        }
        Ok(outcome)
    }

    async fn consume_locked(
        &self,
        channels: &[C],
        patterns: &[P],
        k: &K,
        persist: bool,
        peeks: &BTreeSet<usize>,
        consume_ref: Consume,
        store: &Arc<HotStore<C, P, A, K, H::Reader>>,
    ) -> Result<Option<ConsumeResult<C, A, K>>, TupleSpaceError> {
        let mut candidates_by_position = Vec::with_capacity(channels.len());
        for c in channels {
            let data = store.get_data(c).await?;
            let mut indexed = to_indexed(data);
            shuffle_indexed(&mut indexed);
            candidates_by_position.push(indexed);
        }

        let found =
            extract_data_candidates(&self.config.matcher, channels, patterns, &candidates_by_position);

        match found {
            None => {
                let wc = WaitingContinuation::new(
                    patterns.to_vec(),
                    k.clone(),
                    persist,
                    peeks.clone(),
                    consume_ref.clone(),
                );
                store.put_continuation(channels, wc).await?;
                for c in channels {
                    store.put_join(c, channels.to_vec()).await?;
                }
                self.log.lock().record_consume(consume_ref);
                Ok(None)
            }
            Some(candidates) => {
                let produce_counters: Vec<(Produce, u64)> = candidates
                    .iter()
                    .map(|dc| {
                        let count_before = self.log.lock().produce_count(&dc.datum.source);
                        (dc.datum.source.clone(), count_before + 1)
                    })
                    .collect();

                self.log.lock().record_comm(CommEvent {
                    consume: consume_ref,
                    produces: candidates.iter().map(|dc| dc.datum.source.clone()).collect(),
                    peeks: peeks.clone(),
                    produce_counters,
                });

                let mut removal_order: Vec<usize> = (0..candidates.len()).collect();
                removal_order.sort_by(|&a, &b| candidates[b].index.cmp(&candidates[a].index));
                for i in removal_order {
                    let dc = &candidates[i];
                    let should_remove = !dc.datum.persist && !peeks.contains(&i);
                    if should_remove {
                        if let Some(idx) = dc.index {
                            store.remove_datum(&dc.channel, idx).await?;
                        }
                    }
                }

                let results: Vec<MatchResult<C, A>> = candidates
                    .into_iter()
                    .enumerate()
                    .map(|(i, dc)| {
                        let removed = !dc.datum.persist && !peeks.contains(&i);
                        MatchResult {
                            channel: dc.channel,
                            data: dc.removed_datum,
                            removed,
                            persist: dc.datum.persist,
                        }
                    })
                    .collect();

                Ok(Some(ConsumeResult {
                    cont_result: ContResult {
                        continuation: k.clone(),
                        persist,
                        channels_len: channels.len(),
                        peek: !peeks.is_empty(),
                    },
                    results,
                }))
            }
        }
    }

    pub async fn produce(
        &self,
        channel: C,
        data: A,
        persist: bool,
    ) -> Result<Option<ProduceResult<C, A, K>>, TupleSpaceError> {
        let span = tracing::debug_span!("tuplespace.produce", channel = ?channel);
        let _enter = span.enter();
        let start = std::time::Instant::now();

        let produce_ref = Produce::new(&channel, &data, persist);
        let own_key = stable_hash(&channel);

        let state_guard = self.state.read().await;
        let store = state_guard.store.clone();

        let expand_channel = channel.clone();
        let expand_store = store.clone();

        let outcome = self
            .lock_manager
            .with_two_step_lock::<_, TupleSpaceError, _, _>(
                vec![own_key],
                || async move {
                    let joins = expand_store.get_joins(&expand_channel).await?;
                    let mut extra = Vec::new();
                    for cs in joins {
                        for c in cs {
                            extra.push(stable_hash(&c));
                        }
                    }
                    Ok(extra)
                },
                || self.produce_locked(&channel, &data, persist, produce_ref.clone(), &store),
            )
            .await?;

        drop(state_guard);

        metrics::increment(&self.config, metrics::COMM_PRODUCE);
        metrics::record_timing(&self.config, metrics::COMM_PRODUCE_TIME, start.elapsed());

        if outcome.is_some() {
            tracing::info!(produce = %produce_ref.reference, "produce matched");
        }
        Ok(outcome)
    }

    async fn produce_locked(
        &self,
        channel: &C,
        data: &A,
        persist: bool,
        produce_ref: Produce,
        store: &Arc<HotStore<C, P, A, K, H::Reader>>,
    ) -> Result<Option<ProduceResult<C, A, K>>, TupleSpaceError> {
        let joins = store.get_joins(channel).await?;

        let mut found = None;
        'joins: for cs in &joins {
            let continuations = store.get_continuations(cs).await?;
            if continuations.is_empty() {
                continue;
            }
            let mut indexed_conts: Vec<(usize, WaitingContinuation<P, K>)> =
                continuations.into_iter().enumerate().collect();
            shuffle_pairs(&mut indexed_conts);

            let mut candidates_by_position = Vec::with_capacity(cs.len());
            for c in cs {
                let existing = store.get_data(c).await?;
                let mut indexed = to_indexed(existing);
                if channels_equal(c, channel) {
                    indexed.push(IndexedDatum {
                        index: None,
                        datum: Datum::new(data.clone(), persist, produce_ref.clone()),
                    });
                }
                shuffle_indexed(&mut indexed);
                candidates_by_position.push(indexed);
            }

            if let Some(candidate) = extract_first_match(
                &self.config.matcher,
                cs,
                &indexed_conts,
                |_wc| candidates_by_position.clone(),
            ) {
                found = Some(candidate);
                break 'joins;
            }
        }

        match found {
            None => {
                store
                    .put_datum(channel, Datum::new(data.clone(), persist, produce_ref.clone()))
                    .await?;
                self.log.lock().record_produce(produce_ref);
                Ok(None)
            }
            Some(candidate) => {
                let produce_counters: Vec<(Produce, u64)> = candidate
                    .data_candidates
                    .iter()
                    .filter(|dc| dc.datum.source != produce_ref)
                    .map(|dc| {
                        let count_before = self.log.lock().produce_count(&dc.datum.source);
                        (dc.datum.source.clone(), count_before + 1)
                    })
                    .collect();

                self.log.lock().record_comm(CommEvent {
                    consume: candidate.continuation.source.clone(),
                    produces: candidate
                        .data_candidates
                        .iter()
                        .map(|dc| dc.datum.source.clone())
                        .collect(),
                    peeks: candidate.continuation.peeks.clone(),
                    produce_counters,
                });

                if !candidate.continuation.persist {
                    store
                        .remove_continuation(&candidate.channels, candidate.cont_index)
                        .await?;
                    for c in &candidate.channels {
                        store.remove_join(c, &candidate.channels).await?;
                    }
                }

                let peeks = candidate.continuation.peeks.clone();
                let mut removal_order: Vec<usize> = (0..candidate.data_candidates.len()).collect();
                removal_order.sort_by(|&a, &b| {
                    candidate.data_candidates[b]
                        .index
                        .cmp(&candidate.data_candidates[a].index)
                });
                for i in removal_order {
                    let dc = &candidate.data_candidates[i];
                    let should_remove = !dc.datum.persist && !peeks.contains(&i) && dc.index.is_some();
                    if should_remove {
                        store.remove_datum(&dc.channel, dc.index.unwrap()).await?;
                    }
                }

                let cont_result = ContResult {
                    continuation: candidate.continuation.continuation.clone(),
                    persist: candidate.continuation.persist,
                    channels_len: candidate.channels.len(),
                    peek: !peeks.is_empty(),
                };

                let results: Vec<MatchResult<C, A>> = candidate
                    .data_candidates
                    .into_iter()
                    .enumerate()
                    .map(|(i, dc)| {
                        let removed = !dc.datum.persist && !peeks.contains(&i);
                        MatchResult {
                            channel: dc.channel,
                            data: dc.removed_datum,
                            removed,
                            persist: dc.datum.persist,
                        }
                    })
                    .collect();

                Ok(Some(ProduceResult {
                    cont_result,
                    results,
                }))
            }
        }
    }

    /// Startup-only registration of an always-persistent continuation.
    /// Fails if a matching datum already exists.
    pub async fn install(
        &self,
        channels: Vec<C>,
        patterns: Vec<P>,
        k: K,
    ) -> Result<Option<(K, Vec<A>)>, TupleSpaceError> {
        self.validate_tuple(&channels, &patterns, &BTreeSet::new())?;

        let consume_ref = Consume::new(&channels, &patterns, &k, true);
        let lock_key = hash_channel_tuple(&channels);

        let state_guard = self.state.read().await;
        let store = state_guard.store.clone();

        let outcome = self
            .lock_manager
            .with_two_step_lock::<_, TupleSpaceError, _, _>(
                vec![lock_key],
                || async { Ok(vec![]) },
                || async {
                    let mut candidates_by_position = Vec::with_capacity(channels.len());
                    for c in &channels {
                        let data = store.get_data(c).await?;
                        candidates_by_position.push(to_indexed(data));
                    }
                    if extract_data_candidates(
                        &self.config.matcher,
                        &channels,
                        &patterns,
                        &candidates_by_position,
                    )
                    .is_some()
                    {
                        return Err(TupleSpaceError::InstallAfterStartup);
                    }

                    let wc = WaitingContinuation::new(
                        patterns.clone(),
                        k.clone(),
                        true,
                        BTreeSet::new(),
                        consume_ref.clone(),
                    );
                    store.install_continuation(&channels, wc).await?;
                    for c in &channels {
                        store.install_join(c, channels.clone()).await?;
                    }
                    Ok((channels.clone(), patterns.clone(), k.clone()))
                },
            )
            .await;

        drop(state_guard);

        match outcome {
            Ok((channels, patterns, k)) => {
                self.installs.insert(
                    consume_ref.reference,
                    InstallEntry {
                        channels,
                        install: Install {
                            patterns,
                            continuation: k,
                        },
                    },
                );
                tracing::info!(consume = %consume_ref.reference, "install registered");
                Ok(None)
            }
            Err(TupleSpaceError::InstallAfterStartup) => {
                tracing::warn!(consume = %consume_ref.reference, "install found a pre-existing match");
                Err(TupleSpaceError::InstallAfterStartup)
            }
            Err(e) => Err(e),
        }
    }

    async fn restore_installs(
        &self,
        store: &Arc<HotStore<C, P, A, K, H::Reader>>,
    ) -> Result<(), TupleSpaceError> {
        for entry in self.installs.iter() {
            let InstallEntry { channels, install } = entry.value();
            let consume_ref = Consume::new(channels, &install.patterns, &install.continuation, true);
            let wc = WaitingContinuation::new(
                install.patterns.clone(),
                install.continuation.clone(),
                true,
                BTreeSet::new(),
                consume_ref,
            );
            store.install_continuation(channels, wc).await?;
            for c in channels {
                store.install_join(c, channels.clone()).await?;
            }
        }
        Ok(())
    }

    /// Rebinds the engine atop a new history root: drains the event log and
    /// produce counter, builds a fresh hot store, and re-applies every
    /// install.
    pub async fn reset(&self, root: StableHash) -> Result<(), TupleSpaceError> {
        let reader = self.repository.get_history_reader(root).await?;
        let new_store = Arc::new(HotStore::new(Arc::new(reader)));

        {
            let mut state = self.state.write().await;
            state.store = new_store.clone();
            state.root = root;
        }

        self.log.lock().drain();

        if self.config.lock_cleanup == LockCleanupPolicy::OnReset {
            self.lock_manager.clean_up();
        }

        self.restore_installs(&new_store).await?;

        metrics::increment(&self.config, metrics::RESET);
        tracing::info!(root = %root, "engine reset");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), TupleSpaceError> {
        self.reset(self.config.empty_root).await
    }

    /// Snapshots the hot store and drains the event log and produce counter
    /// atomically; the engine continues from an effectively clean in-session
    /// state atop the same history root.
    pub async fn create_soft_checkpoint(&self) -> Result<SoftCheckpoint<C, P, A, K>, TupleSpaceError> {
        let snapshot = {
            let state = self.state.read().await;
            state.store.snapshot()
        };
        let (events, produce_counter) = self.log.lock().drain();
        Ok(SoftCheckpoint {
            snapshot,
            events,
            produce_counter,
        })
    }

    /// Rebuilds the hot store from a saved snapshot layered over the same
    /// history root, and replaces the event log and produce counter.
    pub async fn revert_to_soft_checkpoint(
        &self,
        checkpoint: SoftCheckpoint<C, P, A, K>,
    ) -> Result<(), TupleSpaceError> {
        let mut state = self.state.write().await;
        let reader = self.repository.get_history_reader(state.root).await?;
        state.store = Arc::new(HotStore::from_snapshot(Arc::new(reader), checkpoint.snapshot));
        drop(state);

        self.log.lock().replace(checkpoint.events, checkpoint.produce_counter);

        metrics::increment(&self.config, metrics::REVERT_SOFT_CHECKPOINT);
        Ok(())
    }

    /// Materializes the hot-store delta into a new history root. The engine
    /// switches to the new root with an empty hot store and event log.
    ///
    /// The produce counter does *not* survive a real checkpoint — only
    /// `createSoftCheckpoint` drains and preserves it across a revert; a
    /// real checkpoint always starts the next session's counter at zero,
    /// matching the reference implementation this crate follows.
    pub async fn create_checkpoint(&self) -> Result<(StableHash, Vec<Event>), TupleSpaceError> {
        let mut state = self.state.write().await;
        let snapshot = state.store.snapshot();
        let delta = HistoryDelta {
            data: snapshot.data,
            continuations: snapshot.continuations,
            joins: snapshot.joins,
        };
        let new_root = self.repository.checkpoint(state.root, delta).await?;
        let reader = self.repository.get_history_reader(new_root).await?;
        state.store = Arc::new(HotStore::new(Arc::new(reader)));
        state.root = new_root;
        drop(state);

        let (events, _discarded_produce_counter) = self.log.lock().drain();
        Ok((new_root, events))
    }

    pub async fn get_data(&self, channel: &C) -> Result<Vec<Datum<A>>, TupleSpaceError> {
        let state = self.state.read().await;
        state.store.get_data(channel).await
    }

    pub async fn get_waiting_continuations(
        &self,
        channels: &[C],
    ) -> Result<Vec<WaitingContinuation<P, K>>, TupleSpaceError> {
        let state = self.state.read().await;
        state.store.get_continuations(channels).await
    }

    pub async fn get_joins(&self, channel: &C) -> Result<Vec<Vec<C>>, TupleSpaceError> {
        let state = self.state.read().await;
        state.store.get_joins(channel).await
    }

    pub async fn to_map(&self) -> CacheSnapshot<C, P, A, K> {
        let state = self.state.read().await;
        state.store.to_map()
    }
}
