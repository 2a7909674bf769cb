//! Two-step hash lock (spec component E): a per-process lock manager over
//! digest keys supporting two acquisition phases, so a producer can lock its
//! own channel, read the data-dependent set of sibling channels it also
//! needs (join-induced), and then acquire the full set atomically.
//!
//! Phase A acquires `initial` under the manager's total key ordering, purely
//! to serialize the data-dependent `expand` read. Phase B drops phase A and
//! re-acquires the full `initial ∪ extra` set in one sorted pass, so no
//! operation ever holds a partial prefix of another's final key set — this
//! is what makes the design deadlock-free without a more general detection
//! scheme.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::hash::StableHash;

struct LockGuardSet {
    keys: Vec<StableHash>,
    guards: Vec<OwnedMutexGuard<()>>,
}

/// A per-process map from digest to mutex, created lazily. Keys are always
/// acquired in ascending lexicographic order to exclude lock-ordering
/// cycles.
pub struct HashLockManager {
    mutexes: DashMap<StableHash, Arc<Mutex<()>>>,
}

impl HashLockManager {
    pub fn new() -> Self {
        HashLockManager {
            mutexes: DashMap::new(),
        }
    }

    fn mutex_for(&self, key: StableHash) -> Arc<Mutex<()>> {
        self.mutexes
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn acquire_sorted(&self, keys: Vec<StableHash>) -> LockGuardSet {
        let mut sorted = keys;
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            let mutex = self.mutex_for(*key);
            guards.push(mutex.lock_owned().await);
        }
        LockGuardSet {
            keys: sorted,
            guards,
        }
    }

    /// Runs `thunk` under the full two-step lock: phase A holds `initial`
    /// while `expand` computes the data-dependent extra key set; phase B
    /// re-acquires `initial ∪ extra`, sorted, before invoking `thunk`.
    ///
    /// For operations with no data-dependent expansion (e.g. `consume`,
    /// whose lock key is simply the hash of its channel tuple), pass an
    /// `expand` that resolves to an empty vector; phase B then degenerates
    /// to a single-phase acquisition of `initial`.
    pub async fn with_two_step_lock<T, E, ExpandFut, ThunkFut>(
        &self,
        initial: Vec<StableHash>,
        expand: impl FnOnce() -> ExpandFut,
        thunk: impl FnOnce() -> ThunkFut,
    ) -> Result<T, E>
    where
        ExpandFut: Future<Output = Result<Vec<StableHash>, E>>,
        ThunkFut: Future<Output = Result<T, E>>,
    {
        let phase_a = self.acquire_sorted(initial.clone()).await;
        let extra = match expand().await {
            Ok(extra) => extra,
            Err(e) => {
                drop(phase_a);
                return Err(e);
            }
        };
        drop(phase_a);

        let mut full = initial;
        full.extend(extra);
        let _phase_b = self.acquire_sorted(full).await;
        thunk().await
    }

    /// Drops mutexes for keys with no outstanding reference. Safe to call
    /// any time; entries currently checked out by an in-flight operation are
    /// left alone (their `Arc` strong count is above the map's own baseline
    /// of one).
    pub fn clean_up(&self) {
        self.mutexes.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn tracked_key_count(&self) -> usize {
        self.mutexes.len()
    }
}

impl Default for HashLockManager {
    fn default() -> Self {
        Self::new()
    }
}
