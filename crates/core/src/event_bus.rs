//! Event bus — fan-out of execution history events to interested observers.
//!
//! The host appends every history event to the execution's own log and then
//! forwards it to an `Arc<dyn EventSink>` so tooling can follow executions
//! without polling `history`.

use crate::types::{EventKind, ExecutionIdentity, HistoryEvent};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Receives history events as they are recorded.
pub trait EventSink: Send + Sync {
    fn emit(&self, execution: &ExecutionIdentity, event: &HistoryEvent);
}

/// No-op sink for tests and hosts without observers.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _execution: &ExecutionIdentity, _event: &HistoryEvent) {}
}

/// Logs each event at debug level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, execution: &ExecutionIdentity, event: &HistoryEvent) {
        debug!(
            execution_id = %execution.execution_id,
            run_id = %execution.run_id,
            event_id = event.event_id,
            event = event.kind.name(),
            "History event recorded"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<(ExecutionIdentity, HistoryEvent)>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(ExecutionIdentity, HistoryEvent)> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Number of captured events with the given `EventKind::name`.
    pub fn count_kind(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| e.kind.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, execution: &ExecutionIdentity, event: &HistoryEvent) {
        self.events.lock().push((execution.clone(), event.clone()));
    }
}

/// Stamps an event with its sequence number and the current time.
pub fn make_event(event_id: u64, kind: EventKind) -> HistoryEvent {
    HistoryEvent {
        event_id,
        timestamp: Utc::now(),
        kind,
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn tracing_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
