use std::sync::Arc;

use tokio::sync::watch;

use crate::context::WorkflowContext;
use crate::types::WorkflowState;

/// Query type under which the journey state is served.
pub const STATE_QUERY: &str = "state";

/// Publishes `WorkflowState` snapshots to the host's query interface.
///
/// Readers always see a whole snapshot from the last `publish`; the journey
/// keeps mutating its own copy in between.
pub struct StateTracker {
    tx: watch::Sender<WorkflowState>,
}

impl StateTracker {
    /// Registers the `state` query. Must run before the journey's first
    /// suspension point.
    pub fn register(ctx: &dyn WorkflowContext, initial: &WorkflowState) -> Self {
        let (tx, rx) = watch::channel(initial.clone());
        ctx.set_query_handler(
            STATE_QUERY,
            Arc::new(move || serde_json::to_value(&*rx.borrow())),
        );
        Self { tx }
    }

    pub fn publish(&self, state: &WorkflowState) {
        self.tx.send_replace(state.clone());
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.tx.borrow().clone()
    }
}
