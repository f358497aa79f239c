//! In-process `WorkflowContext` used by this crate's unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onboarding_core::ExecutionIdentity;
use parking_lot::Mutex;
use serde_json::Value;

use crate::activity::{ActivityInvoker, ActivityOptions, ActivityRegistry};
use crate::context::{ChildOptions, QueryHandler, SignalDelivery, WorkflowContext};
use crate::error::JourneyError;
use crate::signal::SignalMailbox;

pub struct TestContext {
    identity: ExecutionIdentity,
    invoker: ActivityInvoker,
    mailbox: SignalMailbox,
    queries: Mutex<HashMap<String, QueryHandler>>,
    activity_calls: Mutex<Vec<(String, Value)>>,
    child_results: Mutex<HashMap<String, Result<Value, String>>>,
    child_calls: Mutex<Vec<(String, ChildOptions, Value)>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_registry(ActivityRegistry::new())
    }

    pub fn with_registry(registry: ActivityRegistry) -> Self {
        Self::with_identity(registry, ExecutionIdentity::new("wf-test", "run-test"))
    }

    pub fn with_identity(registry: ActivityRegistry, identity: ExecutionIdentity) -> Self {
        Self {
            identity,
            invoker: ActivityInvoker::new(registry, 8),
            mailbox: SignalMailbox::new(),
            queries: Mutex::new(HashMap::new()),
            activity_calls: Mutex::new(Vec::new()),
            child_results: Mutex::new(HashMap::new()),
            child_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn mailbox(&self) -> &SignalMailbox {
        &self.mailbox
    }

    pub fn query(&self, query_type: &str) -> Option<Value> {
        let handler = self.queries.lock().get(query_type).cloned()?;
        handler().ok()
    }

    pub fn activity_calls(&self) -> Vec<(String, Value)> {
        self.activity_calls.lock().clone()
    }

    pub fn script_child(&self, journey: &str, result: Result<Value, String>) {
        self.child_results.lock().insert(journey.to_string(), result);
    }

    pub fn child_calls(&self) -> Vec<(String, ChildOptions, Value)> {
        self.child_calls.lock().clone()
    }
}

#[async_trait]
impl WorkflowContext for TestContext {
    fn identity(&self) -> &ExecutionIdentity {
        &self.identity
    }

    fn journey(&self) -> &str {
        "test"
    }

    fn is_replaying(&self) -> bool {
        false
    }

    async fn execute_activity(
        &self,
        activity: &str,
        input: Value,
        options: &ActivityOptions,
    ) -> Result<Value, JourneyError> {
        self.activity_calls
            .lock()
            .push((activity.to_string(), input.clone()));
        self.invoker
            .invoke(&self.identity, activity, input, options)
            .await
            .map_err(|source| JourneyError::Activity {
                activity: activity.to_string(),
                source,
            })
    }

    async fn receive_signal(
        &self,
        channels: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<SignalDelivery>, JourneyError> {
        match timeout {
            Some(limit) => Ok(tokio::time::timeout(limit, self.mailbox.take(channels))
                .await
                .ok()),
            None => Ok(Some(self.mailbox.take(channels).await)),
        }
    }

    async fn execute_child(
        &self,
        journey: &str,
        options: ChildOptions,
        input: Value,
    ) -> Result<Value, JourneyError> {
        self.child_calls
            .lock()
            .push((journey.to_string(), options.clone(), input));
        let scripted = self.child_results.lock().get(journey).cloned();
        match scripted {
            Some(Ok(value)) => Ok(value),
            Some(Err(reason)) => Err(JourneyError::Child {
                execution_id: options.execution_id,
                reason,
            }),
            None => Err(JourneyError::Host(format!("no child scripted for {journey}"))),
        }
    }

    fn set_query_handler(&self, query_type: &str, handler: QueryHandler) {
        self.queries.lock().insert(query_type.to_string(), handler);
    }
}

pub fn registry_with(names: &[&str]) -> ActivityRegistry {
    let registry = ActivityRegistry::new();
    for name in names {
        let label = name.to_string();
        registry.register(
            *name,
            crate::activity::activity_fn(move |_ctx, _input| {
                let label = label.clone();
                async move { Ok(Value::String(format!("{label} activity ended"))) }
            }),
        );
    }
    registry
}

pub fn shared(ctx: TestContext) -> Arc<TestContext> {
    Arc::new(ctx)
}
