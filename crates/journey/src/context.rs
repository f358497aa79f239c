//! The host-facing surface journey code runs against.
//!
//! Everything non-deterministic (activity results, signal arrival, child
//! outcomes) reaches a journey through this trait, so a host can either
//! perform the work live or feed back a recorded history.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onboarding_core::ExecutionIdentity;
use serde_json::Value;

use crate::activity::ActivityOptions;
use crate::error::JourneyError;

/// Serves a named query from the last published value.
pub type QueryHandler = Arc<dyn Fn() -> Result<Value, serde_json::Error> + Send + Sync>;

/// A raw payload taken off one of the armed channels.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDelivery {
    pub channel: String,
    pub payload: Value,
}

/// How a child execution is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOptions {
    pub execution_id: String,
    pub execution_timeout: Duration,
}

#[async_trait]
pub trait WorkflowContext: Send + Sync {
    fn identity(&self) -> &ExecutionIdentity;

    /// Journey name this execution was started with.
    fn journey(&self) -> &str;

    /// True while the host is re-running the journey against recorded
    /// history. Journey code uses it to suppress duplicate logs.
    fn is_replaying(&self) -> bool;

    /// Runs an activity. Failures surface as `JourneyError::Activity`.
    async fn execute_activity(
        &self,
        activity: &str,
        input: Value,
        options: &ActivityOptions,
    ) -> Result<Value, JourneyError>;

    /// Takes the earliest-delivered signal among `channels`, waiting for one
    /// if none is queued. `Ok(None)` means `timeout` elapsed first.
    async fn receive_signal(
        &self,
        channels: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<SignalDelivery>, JourneyError>;

    /// Starts a child execution and waits for its result.
    async fn execute_child(
        &self,
        journey: &str,
        options: ChildOptions,
        input: Value,
    ) -> Result<Value, JourneyError>;

    fn set_query_handler(&self, query_type: &str, handler: QueryHandler);
}
