//! Durable applicant onboarding journeys: bounded activity calls, signal
//! gates, sequential stage machines and composite parent journeys, all
//! written against a replayable workflow context.

pub mod activity;
pub mod catalog;
pub mod composer;
pub mod context;
pub mod engine;
pub mod error;
pub mod signal;
pub mod state_machine;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod testing;

pub use activity::{
    activity_fn, Activity, ActivityContext, ActivityInfo, ActivityInvoker, ActivityOptions,
    ActivityRegistry, RetryPolicy,
};
pub use catalog::{onboarding_registry, JourneySettings};
pub use composer::{child_execution_id, ChildJourney, JourneyComposer};
pub use context::{ChildOptions, QueryHandler, SignalDelivery, WorkflowContext};
pub use engine::{Journey, JourneyRegistry};
pub use error::{ActivityError, JourneyError};
pub use signal::{Selector, SignalGate, SignalMailbox};
pub use state_machine::{StageMachine, StageSpec};
pub use tracker::{StateTracker, STATE_QUERY};
pub use types::{JourneyInput, StepStatus, WorkflowState, WorkflowStep};
