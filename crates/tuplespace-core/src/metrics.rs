//! Named metrics points (§6.5), and thin helpers that prefix them with the
//! engine's configured metrics source before recording, using the same
//! `metrics` crate this family's performance-tooling layer uses.

use std::time::Duration;

use crate::config::EngineConfig;

pub const COMM_PRODUCE: &str = "comm.produce";
pub const COMM_CONSUME: &str = "comm.consume";
pub const COMM_PRODUCE_TIME: &str = "comm.produce-time";
pub const COMM_CONSUME_TIME: &str = "comm.consume-time";
pub const RESET: &str = "reset";
pub const REVERT_SOFT_CHECKPOINT: &str = "revert-soft-checkpoint";

pub fn increment<M>(config: &EngineConfig<M>, point: &str) {
    metrics::counter!(config.metric_name(point)).increment(1);
}

pub fn record_timing<M>(config: &EngineConfig<M>, point: &str, elapsed: Duration) {
    metrics::histogram!(config.metric_name(point)).record(elapsed.as_secs_f64());
}
