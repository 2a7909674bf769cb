//! The hot store (spec component C): a mutable, in-memory overlay consumed
//! by the engine. Reads fall through to the underlying history for any key
//! the current session hasn't touched yet; writes always land in the
//! overlay, lazily copy-on-write initialized from history on first touch.
//!
//! Indices handed out by `get_data`/`get_continuations` are stable within a
//! single engine operation because the engine always mutates by descending
//! index — this module trusts that invariant rather than re-deriving it.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::error::TupleSpaceError;
use crate::hash::{hash_channel_tuple, stable_hash, CanonicalEncode, StableHash};
use crate::history::HistoryReader;
use crate::model::{Datum, WaitingContinuation};

/// A complete snapshot of a hot store's overlay, used both for soft
/// checkpoints and for materializing a delta at a real checkpoint.
#[derive(Clone)]
pub struct CacheSnapshot<C, P, A, K> {
    pub data: Vec<(C, Vec<Datum<A>>)>,
    pub continuations: Vec<(Vec<C>, Vec<WaitingContinuation<P, K>>)>,
    pub joins: Vec<(C, Vec<Vec<C>>)>,
}

impl<C, P, A, K> CacheSnapshot<C, P, A, K> {
    pub fn empty() -> Self {
        CacheSnapshot {
            data: Vec::new(),
            continuations: Vec::new(),
            joins: Vec::new(),
        }
    }
}

fn channel_tuples_equal<C: CanonicalEncode>(a: &[C], b: &[C]) -> bool {
    hash_channel_tuple(a) == hash_channel_tuple(b)
}

/// Mutable overlay over a read-only `HistoryReader`. One instance backs one
/// engine session; it is rebuilt at `reset` and at `revertToSoftCheckpoint`.
pub struct HotStore<C, P, A, K, H> {
    history: Arc<H>,
    data: DashMap<StableHash, Vec<Datum<A>>>,
    data_channels: DashMap<StableHash, C>,
    continuations: DashMap<StableHash, Vec<WaitingContinuation<P, K>>>,
    continuation_channels: DashMap<StableHash, Vec<C>>,
    joins: DashMap<StableHash, Vec<Vec<C>>>,
    join_channels: DashMap<StableHash, C>,
    install_continuation_keys: DashSet<StableHash>,
    install_join_keys: DashSet<StableHash>,
}

impl<C, P, A, K, H> HotStore<C, P, A, K, H>
where
    C: CanonicalEncode + Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
    H: HistoryReader<C, P, A, K>,
{
    pub fn new(history: Arc<H>) -> Self {
        HotStore {
            history,
            data: DashMap::new(),
            data_channels: DashMap::new(),
            continuations: DashMap::new(),
            continuation_channels: DashMap::new(),
            joins: DashMap::new(),
            join_channels: DashMap::new(),
            install_continuation_keys: DashSet::new(),
            install_join_keys: DashSet::new(),
        }
    }

    /// Rebuilds a hot store from a previously captured snapshot, layered
    /// over `history`. Used by `revertToSoftCheckpoint`.
    pub fn from_snapshot(history: Arc<H>, snapshot: CacheSnapshot<C, P, A, K>) -> Self {
        let store = Self::new(history);
        for (channel, values) in snapshot.data {
            let key = stable_hash(&channel);
            store.data.insert(key, values);
            store.data_channels.insert(key, channel);
        }
        for (channels, values) in snapshot.continuations {
            let key = hash_channel_tuple(&channels);
            store.continuations.insert(key, values);
            store.continuation_channels.insert(key, channels);
        }
        for (channel, values) in snapshot.joins {
            let key = stable_hash(&channel);
            store.joins.insert(key, values);
            store.join_channels.insert(key, channel);
        }
        store
    }

    pub async fn get_data(&self, channel: &C) -> Result<Vec<Datum<A>>, TupleSpaceError> {
        let key = stable_hash(channel);
        if let Some(v) = self.data.get(&key) {
            return Ok(v.clone());
        }
        self.history.get_data(channel).await
    }

    pub async fn get_continuations(
        &self,
        channels: &[C],
    ) -> Result<Vec<WaitingContinuation<P, K>>, TupleSpaceError> {
        let key = hash_channel_tuple(channels);
        if let Some(v) = self.continuations.get(&key) {
            return Ok(v.clone());
        }
        self.history.get_continuations(channels).await
    }

    pub async fn get_joins(&self, channel: &C) -> Result<Vec<Vec<C>>, TupleSpaceError> {
        let key = stable_hash(channel);
        if let Some(v) = self.joins.get(&key) {
            return Ok(v.clone());
        }
        self.history.get_joins(channel).await
    }

    async fn ensure_data_touched(&self, channel: &C) -> Result<StableHash, TupleSpaceError> {
        let key = stable_hash(channel);
        if !self.data.contains_key(&key) {
            let existing = self.history.get_data(channel).await?;
            self.data.entry(key).or_insert(existing);
            self.data_channels.entry(key).or_insert_with(|| channel.clone());
        }
        Ok(key)
    }

    async fn ensure_continuations_touched(
        &self,
        channels: &[C],
    ) -> Result<StableHash, TupleSpaceError> {
        let key = hash_channel_tuple(channels);
        if !self.continuations.contains_key(&key) {
            let existing = self.history.get_continuations(channels).await?;
            self.continuations.entry(key).or_insert(existing);
            self.continuation_channels
                .entry(key)
                .or_insert_with(|| channels.to_vec());
        }
        Ok(key)
    }

    async fn ensure_joins_touched(&self, channel: &C) -> Result<StableHash, TupleSpaceError> {
        let key = stable_hash(channel);
        if !self.joins.contains_key(&key) {
            let existing = self.history.get_joins(channel).await?;
            self.joins.entry(key).or_insert(existing);
            self.join_channels.entry(key).or_insert_with(|| channel.clone());
        }
        Ok(key)
    }

    pub async fn put_datum(&self, channel: &C, datum: Datum<A>) -> Result<(), TupleSpaceError> {
        let key = self.ensure_data_touched(channel).await?;
        self.data.get_mut(&key).expect("just ensured").push(datum);
        Ok(())
    }

    pub async fn put_continuation(
        &self,
        channels: &[C],
        wc: WaitingContinuation<P, K>,
    ) -> Result<(), TupleSpaceError> {
        let key = self.ensure_continuations_touched(channels).await?;
        self.continuations
            .get_mut(&key)
            .expect("just ensured")
            .push(wc);
        Ok(())
    }

    pub async fn put_join(&self, channel: &C, channels: Vec<C>) -> Result<(), TupleSpaceError> {
        let key = self.ensure_joins_touched(channel).await?;
        let mut entry = self.joins.get_mut(&key).expect("just ensured");
        if !entry.iter().any(|existing| channel_tuples_equal(existing, &channels)) {
            entry.push(channels);
        }
        Ok(())
    }

    pub async fn install_continuation(
        &self,
        channels: &[C],
        wc: WaitingContinuation<P, K>,
    ) -> Result<(), TupleSpaceError> {
        let key = self.ensure_continuations_touched(channels).await?;
        self.continuations
            .get_mut(&key)
            .expect("just ensured")
            .push(wc);
        self.install_continuation_keys.insert(key);
        Ok(())
    }

    pub async fn install_join(&self, channel: &C, channels: Vec<C>) -> Result<(), TupleSpaceError> {
        let key = self.ensure_joins_touched(channel).await?;
        {
            let mut entry = self.joins.get_mut(&key).expect("just ensured");
            if !entry.iter().any(|existing| channel_tuples_equal(existing, &channels)) {
                entry.push(channels);
            }
        }
        self.install_join_keys.insert(key);
        Ok(())
    }

    pub async fn remove_datum(&self, channel: &C, index: usize) -> Result<(), TupleSpaceError> {
        let key = self.ensure_data_touched(channel).await?;
        let mut entry = self.data.get_mut(&key).expect("just ensured");
        if index >= entry.len() {
            return Err(TupleSpaceError::store(format!(
                "datum index {index} out of bounds for channel"
            )));
        }
        entry.remove(index);
        Ok(())
    }

    pub async fn remove_continuation(
        &self,
        channels: &[C],
        index: usize,
    ) -> Result<(), TupleSpaceError> {
        let key = self.ensure_continuations_touched(channels).await?;
        let mut entry = self.continuations.get_mut(&key).expect("just ensured");
        if index >= entry.len() {
            return Err(TupleSpaceError::store(format!(
                "continuation index {index} out of bounds for channel tuple"
            )));
        }
        entry.remove(index);
        Ok(())
    }

    pub async fn remove_join(&self, channel: &C, channels: &[C]) -> Result<(), TupleSpaceError> {
        let key = self.ensure_joins_touched(channel).await?;
        let mut entry = self.joins.get_mut(&key).expect("just ensured");
        entry.retain(|existing| !channel_tuples_equal(existing, channels));
        Ok(())
    }

    /// Captures the complete overlay for a soft checkpoint.
    pub fn snapshot(&self) -> CacheSnapshot<C, P, A, K> {
        let data = self
            .data
            .iter()
            .map(|entry| {
                let channel = self
                    .data_channels
                    .get(entry.key())
                    .expect("data key always has a recorded channel")
                    .clone();
                (channel, entry.value().clone())
            })
            .collect();
        let continuations = self
            .continuations
            .iter()
            .map(|entry| {
                let channels = self
                    .continuation_channels
                    .get(entry.key())
                    .expect("continuation key always has recorded channels")
                    .clone();
                (channels, entry.value().clone())
            })
            .collect();
        let joins = self
            .joins
            .iter()
            .map(|entry| {
                let channel = self
                    .join_channels
                    .get(entry.key())
                    .expect("join key always has a recorded channel")
                    .clone();
                (channel, entry.value().clone())
            })
            .collect();
        CacheSnapshot {
            data,
            continuations,
            joins,
        }
    }

    /// A materialized view of every entry touched by the current session.
    /// This does not enumerate history: the history interface only supports
    /// point reads by key, so entries never touched this session are not
    /// representable here.
    pub fn to_map(&self) -> CacheSnapshot<C, P, A, K> {
        self.snapshot()
    }
}
