//! The execution host API orchestration code is started, signalled and
//! queried through.

use std::time::Duration;

use async_trait::async_trait;
use onboarding_core::config::HostConfig;
use onboarding_core::{ExecutionIdentity, ExecutionStatus, HistoryEvent};
use serde_json::Value;

use crate::error::HostResult;

/// How a new execution is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub task_queue: String,
    /// Caller-chosen execution id; the host generates one when unset.
    pub execution_id: Option<String>,
    pub execution_timeout: Duration,
}

impl StartOptions {
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }
}

impl From<&HostConfig> for StartOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            task_queue: config.task_queue.clone(),
            execution_id: None,
            execution_timeout: config.execution_timeout(),
        }
    }
}

/// Final result of an execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed(String),
    TimedOut,
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Completed(_) => ExecutionStatus::Completed,
            ExecutionOutcome::Failed(_) => ExecutionStatus::Failed,
            ExecutionOutcome::TimedOut => ExecutionStatus::TimedOut,
        }
    }
}

#[async_trait]
pub trait ExecutionHost: Send + Sync {
    async fn start(
        &self,
        options: StartOptions,
        journey: &str,
        input: Value,
    ) -> HostResult<ExecutionIdentity>;

    /// Delivers `payload` on `channel`. When `run_id` is given it must name
    /// the execution's current run.
    async fn signal(
        &self,
        execution_id: &str,
        run_id: Option<&str>,
        channel: &str,
        payload: Value,
    ) -> HostResult<()>;

    async fn query(&self, execution_id: &str, query_type: &str) -> HostResult<Value>;

    async fn history(
        &self,
        execution_id: &str,
        run_id: Option<&str>,
    ) -> HostResult<Vec<HistoryEvent>>;

    async fn describe(&self, execution_id: &str) -> HostResult<ExecutionStatus>;
}
