//! A concurrent, content-addressed tuplespace engine.
//!
//! Producers publish typed data on channels; consumers register typed
//! patterns on tuples of channels together with a continuation. Whenever a
//! data set satisfies some registered pattern tuple, the engine atomically
//! removes the matched items, hands the continuation back to the caller,
//! and records a communication event. Persistent producers/consumers,
//! peek semantics, joins, checkpointing and deterministic replay of a
//! recorded event log are all supported.
//!
//! The crate is organized the way its own design decomposes it:
//! [`hash`] (stable content hashing), [`history`] (the read-only persisted
//! view), [`store`] (the mutable hot overlay), [`eventlog`] (the session
//! log and produce counter), [`lock`] (the two-step hash lock), [`matcher`]
//! (the pluggable pattern-matching driver), [`engine`] (the public
//! `produce`/`consume`/`install` surface) and [`replay`] (deterministic
//! re-execution of a recorded log).

pub mod config;
pub mod engine;
pub mod error;
pub mod eventlog;
pub mod hash;
pub mod history;
pub mod lock;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod replay;
pub mod store;

pub use eventlog::SessionLog;

/// Convenience re-exports for the common construction/usage path.
pub mod prelude {
    pub use crate::config::{EngineConfig, LockCleanupPolicy};
    pub use crate::engine::{SoftCheckpoint, TupleSpace};
    pub use crate::error::TupleSpaceError;
    pub use crate::hash::{stable_hash, CanonicalEncode, StableHash};
    pub use crate::history::{HistoryDelta, HistoryReader, HistoryRepository, InMemoryHistory};
    pub use crate::matcher::PatternMatcher;
    pub use crate::model::{
        ChannelsHash, CommEvent, Consume, ConsumeResult, ContResult, ContentHash, Datum, Event,
        Install, MatchResult, Produce, ProduceResult, WaitingContinuation,
    };
    pub use crate::replay::ReplayTupleSpace;
}
