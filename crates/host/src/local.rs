//! In-process execution host.
//!
//! Every execution runs as one tokio task against a `HostContext` that
//! performs activities, signal waits and child executions live and records
//! each observed outcome in the execution's history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use onboarding_core::event_bus::{make_event, tracing_sink, EventSink};
use onboarding_core::{EventKind, ExecutionIdentity, ExecutionStatus, HistoryEvent};
use onboarding_journey::{
    ActivityInvoker, ActivityOptions, ChildOptions, JourneyError, JourneyRegistry, QueryHandler,
    SignalDelivery, SignalMailbox, WorkflowContext, STATE_QUERY,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{ExecutionHost, ExecutionOutcome, StartOptions};
use crate::error::{HostError, HostResult};

/// Live state of one run.
struct ExecutionRecord {
    identity: ExecutionIdentity,
    journey: String,
    task_queue: String,
    mailbox: SignalMailbox,
    history: Mutex<Vec<HistoryEvent>>,
    queries: Mutex<HashMap<String, QueryHandler>>,
    outcome: watch::Sender<Option<ExecutionOutcome>>,
    sink: Arc<dyn EventSink>,
}

impl ExecutionRecord {
    fn new(
        identity: ExecutionIdentity,
        journey: String,
        task_queue: String,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            identity,
            journey,
            task_queue,
            mailbox: SignalMailbox::new(),
            history: Mutex::new(Vec::new()),
            queries: Mutex::new(HashMap::new()),
            outcome,
            sink,
        }
    }

    fn append(&self, kind: EventKind) {
        let event = {
            let mut history = self.history.lock();
            let event = make_event(history.len() as u64 + 1, kind);
            history.push(event.clone());
            event
        };
        self.sink.emit(&self.identity, &event);
    }

    fn status(&self) -> ExecutionStatus {
        self.outcome
            .borrow()
            .as_ref()
            .map(ExecutionOutcome::status)
            .unwrap_or(ExecutionStatus::Running)
    }

    fn finish(&self, outcome: ExecutionOutcome) {
        let kind = match &outcome {
            ExecutionOutcome::Completed(result) => EventKind::ExecutionCompleted {
                result: result.clone(),
            },
            ExecutionOutcome::Failed(reason) => EventKind::ExecutionFailed {
                reason: reason.clone(),
            },
            ExecutionOutcome::TimedOut => EventKind::ExecutionTimedOut,
        };
        self.append(kind);
        self.outcome.send_replace(Some(outcome));
    }

    fn check_run(&self, run_id: Option<&str>) -> HostResult<()> {
        match run_id {
            Some(run) if !run.is_empty() && run != self.identity.run_id => {
                Err(HostError::RunMismatch {
                    execution_id: self.identity.execution_id.clone(),
                    run_id: run.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

struct HostInner {
    journeys: JourneyRegistry,
    invoker: ActivityInvoker,
    executions: DashMap<String, Arc<ExecutionRecord>>,
    /// Finished runs in the order they ended, oldest first.
    finished: Mutex<VecDeque<ExecutionIdentity>>,
    retained: usize,
    sink: Arc<dyn EventSink>,
}

/// Finished runs kept when no bound is configured.
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 10_000;

/// Runs journeys in the current tokio runtime.
#[derive(Clone)]
pub struct LocalHost {
    inner: Arc<HostInner>,
}

impl std::fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHost")
            .field("journeys", &self.inner.journeys)
            .field("executions", &self.inner.executions.len())
            .finish()
    }
}

impl LocalHost {
    pub fn new(journeys: JourneyRegistry, invoker: ActivityInvoker) -> Self {
        Self::with_event_sink(journeys, invoker, tracing_sink())
    }

    pub fn with_event_sink(
        journeys: JourneyRegistry,
        invoker: ActivityInvoker,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                journeys,
                invoker,
                executions: DashMap::new(),
                finished: Mutex::new(VecDeque::new()),
                retained: DEFAULT_RETAINED_EXECUTIONS,
                sink,
            }),
        }
    }

    /// Bounds how many finished runs stay queryable. Must be called before
    /// the host is cloned.
    pub fn with_retention(mut self, retained: usize) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.retained = retained;
        }
        self
    }

    pub fn journeys(&self) -> &JourneyRegistry {
        &self.inner.journeys
    }

    fn record(&self, execution_id: &str) -> HostResult<Arc<ExecutionRecord>> {
        self.inner
            .executions
            .get(execution_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| HostError::NotFound(execution_id.to_string()))
    }

    /// Waits for the current run of `execution_id` to finish.
    pub async fn await_outcome(&self, execution_id: &str) -> HostResult<ExecutionOutcome> {
        let record = self.record(execution_id)?;
        Self::outcome_of(&record).await
    }

    async fn outcome_of(record: &ExecutionRecord) -> HostResult<ExecutionOutcome> {
        let not_running = || HostError::NotRunning(record.identity.execution_id.clone());
        let mut rx = record.outcome.subscribe();
        let settled = rx.wait_for(Option::is_some).await.map_err(|_| not_running())?;
        settled.clone().ok_or_else(not_running)
    }

    fn launch(
        &self,
        options: StartOptions,
        journey: &str,
        input: Value,
    ) -> HostResult<Arc<ExecutionRecord>> {
        let definition = self
            .inner
            .journeys
            .get(journey)
            .ok_or_else(|| HostError::UnknownJourney(journey.to_string()))?;

        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| format!("{journey}-{}", Uuid::new_v4()));
        let identity = ExecutionIdentity::new(execution_id.clone(), Uuid::new_v4().to_string());

        let entry = self.inner.executions.entry(execution_id.clone());
        if let Entry::Occupied(existing) = &entry {
            if existing.get().status() == ExecutionStatus::Running {
                return Err(HostError::AlreadyStarted(execution_id));
            }
        }

        // Fully initialised before it becomes visible to signals and queries.
        let record = Arc::new(ExecutionRecord::new(
            identity.clone(),
            journey.to_string(),
            options.task_queue.clone(),
            self.inner.sink.clone(),
        ));
        record.append(EventKind::ExecutionStarted {
            journey: journey.to_string(),
            input: input.clone(),
        });
        // Served until the journey registers its own tracker.
        if let Ok(initial) = definition.initial_state() {
            let handler: QueryHandler = Arc::new(move || serde_json::to_value(&initial));
            record.queries.lock().insert(STATE_QUERY.to_string(), handler);
        }

        match entry {
            Entry::Occupied(mut existing) => {
                existing.insert(record.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        info!(
            execution_id = %identity.execution_id,
            run_id = %identity.run_id,
            journey = %journey,
            task_queue = %options.task_queue,
            "Started Workflow"
        );
        metrics::counter!("host.executions.started").increment(1);

        self.spawn(record.clone(), definition, input, options.execution_timeout);
        Ok(record)
    }

    /// Evicts the oldest finished runs beyond the retention bound. A run
    /// replaced by a restart is already gone and is skipped.
    fn retire(&self, identity: ExecutionIdentity) {
        let evicted: Vec<ExecutionIdentity> = {
            let mut finished = self.inner.finished.lock();
            finished.push_back(identity);
            let excess = finished.len().saturating_sub(self.inner.retained);
            finished.drain(..excess).collect()
        };
        for old in evicted {
            let removed = self.inner.executions.remove_if(&old.execution_id, |_, record| {
                record.identity.run_id == old.run_id && record.status().is_terminal()
            });
            if removed.is_some() {
                debug!(
                    execution_id = %old.execution_id,
                    run_id = %old.run_id,
                    "Evicted finished execution"
                );
                metrics::counter!("host.executions.evicted").increment(1);
            }
        }
    }

    fn spawn(
        &self,
        record: Arc<ExecutionRecord>,
        journey: Arc<dyn onboarding_journey::Journey>,
        input: Value,
        timeout: Duration,
    ) {
        let host = self.clone();
        let ctx = HostContext {
            host: self.clone(),
            record: record.clone(),
        };
        tokio::spawn(async move {
            let mut task = tokio::spawn(async move { journey.run(&ctx, input).await });
            let outcome = match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(Ok(result))) => {
                    info!(
                        execution_id = %record.identity.execution_id,
                        run_id = %record.identity.run_id,
                        journey = %record.journey,
                        "Execution completed"
                    );
                    metrics::counter!("host.executions.completed").increment(1);
                    ExecutionOutcome::Completed(result)
                }
                Ok(Ok(Err(err))) => {
                    error!(
                        execution_id = %record.identity.execution_id,
                        run_id = %record.identity.run_id,
                        journey = %record.journey,
                        error = %err,
                        "Execution failed"
                    );
                    metrics::counter!("host.executions.failed").increment(1);
                    ExecutionOutcome::Failed(err.to_string())
                }
                Ok(Err(join_err)) => {
                    error!(
                        execution_id = %record.identity.execution_id,
                        run_id = %record.identity.run_id,
                        journey = %record.journey,
                        error = %join_err,
                        "Execution panicked"
                    );
                    metrics::counter!("host.executions.failed").increment(1);
                    ExecutionOutcome::Failed(format!("journey {} panicked", record.journey))
                }
                Err(_) => {
                    task.abort();
                    warn!(
                        execution_id = %record.identity.execution_id,
                        run_id = %record.identity.run_id,
                        timeout_secs = timeout.as_secs(),
                        "Execution timed out"
                    );
                    metrics::counter!("host.executions.timed_out").increment(1);
                    ExecutionOutcome::TimedOut
                }
            };
            record.finish(outcome);
            host.retire(record.identity.clone());
        });
    }
}

#[async_trait]
impl ExecutionHost for LocalHost {
    async fn start(
        &self,
        options: StartOptions,
        journey: &str,
        input: Value,
    ) -> HostResult<ExecutionIdentity> {
        self.launch(options, journey, input)
            .map(|record| record.identity.clone())
    }

    async fn signal(
        &self,
        execution_id: &str,
        run_id: Option<&str>,
        channel: &str,
        payload: Value,
    ) -> HostResult<()> {
        let record = self.record(execution_id)?;
        record.check_run(run_id)?;
        if record.status().is_terminal() {
            return Err(HostError::NotRunning(execution_id.to_string()));
        }

        record.append(EventKind::SignalReceived {
            channel: channel.to_string(),
            payload: payload.clone(),
        });
        let seq = record.mailbox.deliver(channel, payload);
        info!(
            execution_id = %execution_id,
            run_id = %record.identity.run_id,
            channel = %channel,
            delivery = seq,
            "Signal delivered"
        );
        metrics::counter!("host.signals.delivered").increment(1);
        Ok(())
    }

    async fn query(&self, execution_id: &str, query_type: &str) -> HostResult<Value> {
        let record = self.record(execution_id)?;
        let handler = record
            .queries
            .lock()
            .get(query_type)
            .cloned()
            .ok_or_else(|| HostError::UnknownQuery {
                execution_id: execution_id.to_string(),
                query_type: query_type.to_string(),
            })?;
        handler().map_err(|e| HostError::QueryFailed {
            query_type: query_type.to_string(),
            reason: e.to_string(),
        })
    }

    async fn history(
        &self,
        execution_id: &str,
        run_id: Option<&str>,
    ) -> HostResult<Vec<HistoryEvent>> {
        let record = self.record(execution_id)?;
        record.check_run(run_id)?;
        let history = record.history.lock().clone();
        Ok(history)
    }

    async fn describe(&self, execution_id: &str) -> HostResult<ExecutionStatus> {
        Ok(self.record(execution_id)?.status())
    }
}

/// Live `WorkflowContext` for one execution.
struct HostContext {
    host: LocalHost,
    record: Arc<ExecutionRecord>,
}

#[async_trait]
impl WorkflowContext for HostContext {
    fn identity(&self) -> &ExecutionIdentity {
        &self.record.identity
    }

    fn journey(&self) -> &str {
        &self.record.journey
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
        self.record.append(EventKind::ActivityScheduled {
            activity: activity.to_string(),
            input: input.clone(),
        });
        match self
            .host
            .inner
            .invoker
            .invoke(&self.record.identity, activity, input, options)
            .await
        {
            Ok(result) => {
                self.record.append(EventKind::ActivityCompleted {
                    activity: activity.to_string(),
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(source) => {
                self.record.append(EventKind::ActivityFailed {
                    activity: activity.to_string(),
                    reason: source.reason().to_string(),
                });
                Err(JourneyError::Activity {
                    activity: activity.to_string(),
                    source,
                })
            }
        }
    }

    async fn receive_signal(
        &self,
        channels: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<SignalDelivery>, JourneyError> {
        let taken = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.record.mailbox.take(channels))
                .await
                .ok(),
            None => Some(self.record.mailbox.take(channels).await),
        };
        match taken {
            Some(delivery) => {
                self.record.append(EventKind::SignalConsumed {
                    channel: delivery.channel.clone(),
                    payload: delivery.payload.clone(),
                });
                Ok(Some(delivery))
            }
            None => {
                self.record.append(EventKind::SignalWaitTimedOut {
                    channels: channels.to_vec(),
                });
                Ok(None)
            }
        }
    }

    async fn execute_child(
        &self,
        journey: &str,
        options: ChildOptions,
        input: Value,
    ) -> Result<Value, JourneyError> {
        let start = StartOptions {
            task_queue: self.record.task_queue.clone(),
            execution_id: Some(options.execution_id.clone()),
            execution_timeout: options.execution_timeout,
        };
        self.record.append(EventKind::ChildStarted {
            execution_id: options.execution_id.clone(),
            journey: journey.to_string(),
        });

        let outcome = match self.host.launch(start, journey, input) {
            Ok(child) => LocalHost::outcome_of(&child).await,
            Err(err) => Err(err),
        };
        let failure = match outcome {
            Ok(ExecutionOutcome::Completed(result)) => {
                self.record.append(EventKind::ChildCompleted {
                    execution_id: options.execution_id.clone(),
                    result: result.clone(),
                });
                return Ok(result);
            }
            Ok(ExecutionOutcome::Failed(reason)) => reason,
            Ok(ExecutionOutcome::TimedOut) => "child execution timed out".to_string(),
            Err(err) => err.to_string(),
        };
        self.record.append(EventKind::ChildFailed {
            execution_id: options.execution_id.clone(),
            reason: failure.clone(),
        });
        Err(JourneyError::Child {
            execution_id: options.execution_id,
            reason: failure,
        })
    }

    fn set_query_handler(&self, query_type: &str, handler: QueryHandler) {
        self.record
            .queries
            .lock()
            .insert(query_type.to_string(), handler);
    }
}
