//! The history interface (spec component B): a read-only view of persisted
//! state keyed by a root digest, plus one reference in-memory implementation
//! good for tests and for embedding this engine where a caller supplies its
//! own on-disk, trie/Merkle-backed driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::TupleSpaceError;
use crate::hash::{hash_channel_tuple, hash_fields, stable_hash, CanonicalEncode, StableHash};
use crate::model::{Datum, WaitingContinuation};

/// Read-only reader over the committed state at a fixed root. Concurrent
/// readers are always safe; no mutation is possible through this interface.
#[async_trait]
pub trait HistoryReader<C, P, A, K>: Send + Sync {
    async fn get_data(&self, channel: &C) -> Result<Vec<Datum<A>>, TupleSpaceError>;

    async fn get_continuations(
        &self,
        channels: &[C],
    ) -> Result<Vec<WaitingContinuation<P, K>>, TupleSpaceError>;

    async fn get_joins(&self, channel: &C) -> Result<Vec<Vec<C>>, TupleSpaceError>;

    /// The root digest this reader was obtained for.
    fn base(&self) -> StableHash;
}

/// The hot store's accumulated overlay, handed to the history repository at
/// checkpoint time so it can be materialized into a new root.
pub struct HistoryDelta<C, P, A, K> {
    pub data: Vec<(C, Vec<Datum<A>>)>,
    pub continuations: Vec<(Vec<C>, Vec<WaitingContinuation<P, K>>)>,
    pub joins: Vec<(C, Vec<Vec<C>>)>,
}

/// Obtains readers at a root, and materializes a hot-store delta into a new
/// root (`checkpoint`). This is the integration seam for a real trie/Merkle
/// backed implementation; persisted on-disk layout is out of scope here.
#[async_trait]
pub trait HistoryRepository<C, P, A, K>: Send + Sync {
    type Reader: HistoryReader<C, P, A, K>;

    async fn get_history_reader(
        &self,
        root: StableHash,
    ) -> Result<Self::Reader, TupleSpaceError>;

    async fn checkpoint(
        &self,
        base: StableHash,
        delta: HistoryDelta<C, P, A, K>,
    ) -> Result<StableHash, TupleSpaceError>;

    /// The canonical empty state's root.
    fn empty_root(&self) -> StableHash;
}

struct HistoryState<C, P, A, K> {
    data: HashMap<StableHash, Vec<Datum<A>>>,
    continuations: HashMap<StableHash, Vec<WaitingContinuation<P, K>>>,
    joins: HashMap<StableHash, Vec<Vec<C>>>,
}

impl<C, P, A, K> HistoryState<C, P, A, K> {
    fn empty() -> Self {
        HistoryState {
            data: HashMap::new(),
            continuations: HashMap::new(),
            joins: HashMap::new(),
        }
    }
}

/// A reference, in-memory, append-only history. Suitable for tests and for
/// embedding this engine where on-disk persistence is handled elsewhere.
/// Roots are assigned by an internal monotonic counter rather than a
/// content-addressed Merkle digest, since the real persistence layer this
/// trait exists to front is explicitly out of scope.
pub struct InMemoryHistory<C, P, A, K> {
    roots: DashMap<StableHash, Arc<HistoryState<C, P, A, K>>>,
    empty_root: StableHash,
    next_root_seq: AtomicU64,
}

impl<C, P, A, K> InMemoryHistory<C, P, A, K> {
    pub fn new() -> Self {
        let empty_root = StableHash([0u8; 32]);
        let roots = DashMap::new();
        roots.insert(empty_root, Arc::new(HistoryState::empty()));
        InMemoryHistory {
            roots,
            empty_root,
            next_root_seq: AtomicU64::new(1),
        }
    }
}

impl<C, P, A, K> Default for InMemoryHistory<C, P, A, K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InMemoryHistoryReader<C, P, A, K> {
    root: StableHash,
    state: Arc<HistoryState<C, P, A, K>>,
}

#[async_trait]
impl<C, P, A, K> HistoryReader<C, P, A, K> for InMemoryHistoryReader<C, P, A, K>
where
    C: CanonicalEncode + Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    async fn get_data(&self, channel: &C) -> Result<Vec<Datum<A>>, TupleSpaceError> {
        let key = stable_hash(channel);
        Ok(self.state.data.get(&key).cloned().unwrap_or_default())
    }

    async fn get_continuations(
        &self,
        channels: &[C],
    ) -> Result<Vec<WaitingContinuation<P, K>>, TupleSpaceError> {
        let key = hash_channel_tuple(channels);
        Ok(self
            .state
            .continuations
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_joins(&self, channel: &C) -> Result<Vec<Vec<C>>, TupleSpaceError> {
        let key = stable_hash(channel);
        Ok(self.state.joins.get(&key).cloned().unwrap_or_default())
    }

    fn base(&self) -> StableHash {
        self.root
    }
}

#[async_trait]
impl<C, P, A, K> HistoryRepository<C, P, A, K> for InMemoryHistory<C, P, A, K>
where
    C: CanonicalEncode + Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    K: Clone + Send + Sync + 'static,
{
    type Reader = InMemoryHistoryReader<C, P, A, K>;

    async fn get_history_reader(
        &self,
        root: StableHash,
    ) -> Result<Self::Reader, TupleSpaceError> {
        let state = self
            .roots
            .get(&root)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TupleSpaceError::store(format!("unknown history root {root}")))?;
        Ok(InMemoryHistoryReader { root, state })
    }

    async fn checkpoint(
        &self,
        base: StableHash,
        delta: HistoryDelta<C, P, A, K>,
    ) -> Result<StableHash, TupleSpaceError> {
        let base_state = self
            .roots
            .get(&base)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TupleSpaceError::store(format!("unknown history root {base}")))?;

        let mut data = base_state.data.clone();
        for (channel, values) in delta.data {
            data.insert(stable_hash(&channel), values);
        }

        let mut continuations = base_state.continuations.clone();
        for (channels, values) in delta.continuations {
            continuations.insert(hash_channel_tuple(&channels), values);
        }

        let mut joins = base_state.joins.clone();
        for (channel, values) in delta.joins {
            joins.insert(stable_hash(&channel), values);
        }

        let seq = self.next_root_seq.fetch_add(1, Ordering::SeqCst);
        let new_root = hash_fields(&[base.as_bytes(), &seq.to_be_bytes()]);

        self.roots.insert(
            new_root,
            Arc::new(HistoryState {
                data,
                continuations,
                joins,
            }),
        );
        Ok(new_root)
    }

    fn empty_root(&self) -> StableHash {
        self.empty_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::model::{Consume, Produce};

    #[tokio::test]
    async fn empty_root_reads_as_empty() {
        let history: InMemoryHistory<String, String, i64, String> = InMemoryHistory::new();
        let reader = history
            .get_history_reader(history.empty_root())
            .await
            .unwrap();
        assert!(reader.get_data(&"c".to_string()).await.unwrap().is_empty());
        assert!(reader
            .get_continuations(&["c".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn checkpoint_produces_a_new_root_with_merged_data() {
        let history: InMemoryHistory<String, String, i64, String> = InMemoryHistory::new();
        let base = history.empty_root();

        let produce = Produce::new(&"c".to_string(), &1i64, false);
        let delta = HistoryDelta {
            data: vec![(
                "c".to_string(),
                vec![Datum::new(1i64, false, produce)],
            )],
            continuations: vec![],
            joins: vec![],
        };
        let new_root = history.checkpoint(base, delta).await.unwrap();
        assert_ne!(new_root, base);

        let reader = history.get_history_reader(new_root).await.unwrap();
        let data = reader.get_data(&"c".to_string()).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].a, 1);

        // the base root is untouched
        let base_reader = history.get_history_reader(base).await.unwrap();
        assert!(base_reader
            .get_data(&"c".to_string())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_root_is_a_store_error() {
        let history: InMemoryHistory<String, String, i64, String> = InMemoryHistory::new();
        let bogus = StableHash([7u8; 32]);
        let err = history.get_history_reader(bogus).await.unwrap_err();
        assert!(matches!(err, TupleSpaceError::Store(_)));
    }

    #[tokio::test]
    async fn continuations_keyed_by_ordered_channel_tuple() {
        let history: InMemoryHistory<String, String, i64, String> = InMemoryHistory::new();
        let base = history.empty_root();

        let consume = Consume::new(
            &["a".to_string(), "b".to_string()],
            &["*".to_string(), "*".to_string()],
            &"k".to_string(),
            false,
        );
        let wc = WaitingConsumeFixture::wc(consume);
        let delta = HistoryDelta {
            data: vec![],
            continuations: vec![(vec!["a".to_string(), "b".to_string()], vec![wc])],
            joins: vec![],
        };
        let new_root = history.checkpoint(base, delta).await.unwrap();
        let reader = history.get_history_reader(new_root).await.unwrap();

        let ab = reader
            .get_continuations(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(ab.len(), 1);

        let ba = reader
            .get_continuations(&["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert!(ba.is_empty());
    }

    struct WaitingConsumeFixture;
    impl WaitingConsumeFixture {
        fn wc(consume: Consume) -> WaitingContinuation<String, String> {
            WaitingContinuation::new(
                vec!["*".to_string(), "*".to_string()],
                "k".to_string(),
                false,
                BTreeSet::new(),
                consume,
            )
        }
    }
}
