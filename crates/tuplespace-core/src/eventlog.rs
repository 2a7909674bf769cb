//! Event log and produce counter (spec component D): two single-writer
//! slots holding the ordered list of logical events and the per-produce
//! repeat count, drained atomically at soft checkpoint and replaced on
//! revert. No cross-session persistence.

use std::collections::HashMap;

use crate::model::{CommEvent, Consume, Event, Produce};

/// The session's event log plus its produce counter, bundled so callers
/// drain and replace them together under one critical section.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    events: Vec<Event>,
    produce_counter: HashMap<crate::model::ContentHash, u64>,
}

impl SessionLog {
    pub fn new() -> Self {
        SessionLog::default()
    }

    pub fn record_produce(&mut self, produce: Produce) {
        self.events.push(Event::Produce(produce));
    }

    pub fn record_consume(&mut self, consume: Consume) {
        self.events.push(Event::Consume(consume));
    }

    pub fn record_comm(&mut self, comm: CommEvent) {
        for (produce, _) in &comm.produce_counters {
            *self.produce_counter.entry(produce.reference).or_insert(0) += 1;
        }
        self.events.push(Event::Comm(comm));
    }

    pub fn produce_count(&self, produce: &Produce) -> u64 {
        self.produce_counter
            .get(&produce.reference)
            .copied()
            .unwrap_or(0)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Atomically takes the current log and counter, leaving both empty.
    pub fn drain(&mut self) -> (Vec<Event>, HashMap<crate::model::ContentHash, u64>) {
        (
            std::mem::take(&mut self.events),
            std::mem::take(&mut self.produce_counter),
        )
    }

    /// Replaces the log and counter wholesale, as on `revertToSoftCheckpoint`.
    pub fn replace(&mut self, events: Vec<Event>, produce_counter: HashMap<crate::model::ContentHash, u64>) {
        self.events = events;
        self.produce_counter = produce_counter;
    }
}
