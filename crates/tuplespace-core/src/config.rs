//! Engine configuration, constructed once at startup and threaded through
//! the engine constructor. No ambient globals.

use crate::hash::StableHash;

/// When the lock manager's `cleanUp` (dropping mutexes with no outstanding
/// reference) runs automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCleanupPolicy {
    /// Run `cleanUp` as part of every `reset`/`clear`.
    OnReset,
    /// Never run automatically; a caller invokes it explicitly.
    Manual,
}

impl Default for LockCleanupPolicy {
    fn default() -> Self {
        LockCleanupPolicy::OnReset
    }
}

/// Engine configuration: the matcher instance, the metrics label prefix, the
/// history's canonical empty root, and the lock-manager cleanup policy.
#[derive(Debug, Clone)]
pub struct EngineConfig<M> {
    pub matcher: M,
    pub metrics_prefix: String,
    pub empty_root: StableHash,
    pub lock_cleanup: LockCleanupPolicy,
}

impl<M> EngineConfig<M> {
    pub fn new(matcher: M, empty_root: StableHash) -> Self {
        EngineConfig {
            matcher,
            metrics_prefix: "tuplespace".to_string(),
            empty_root,
            lock_cleanup: LockCleanupPolicy::default(),
        }
    }

    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    pub fn with_lock_cleanup(mut self, policy: LockCleanupPolicy) -> Self {
        self.lock_cleanup = policy;
        self
    }

    /// Fully-qualified metric name for one of the named points in the
    /// configuration interface (`comm.produce`, `comm.consume`, ...).
    pub fn metric_name(&self, point: &str) -> String {
        format!("{}.{}", self.metrics_prefix, point)
    }
}
