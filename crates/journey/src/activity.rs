//! Bounded invocation of side-effecting activities.
//!
//! Every call is subject to three deadlines: waiting for a worker slot
//! (schedule-to-start), running to completion (start-to-close) and the gap
//! between heartbeats. Retries only happen when a `RetryPolicy` is attached
//! to the options.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use onboarding_core::config::{ActivityConfig, RetryConfig};
use onboarding_core::ExecutionIdentity;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::error::ActivityError;

/// Deadlines and retry behaviour for one activity call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    pub schedule_to_start_timeout: Duration,
    pub start_to_close_timeout: Duration,
    /// `None` disables the heartbeat watchdog.
    pub heartbeat_timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self::from(&ActivityConfig::default())
    }
}

impl From<&ActivityConfig> for ActivityOptions {
    fn from(config: &ActivityConfig) -> Self {
        Self {
            schedule_to_start_timeout: Duration::from_secs(config.schedule_to_start_secs),
            start_to_close_timeout: Duration::from_secs(config.start_to_close_secs),
            heartbeat_timeout: (config.heartbeat_secs > 0)
                .then(|| Duration::from_secs(config.heartbeat_secs)),
            retry_policy: config.retry.as_ref().map(RetryPolicy::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    /// Total attempts including the first; zero means unlimited.
    pub maximum_attempts: u32,
    pub non_retriable_reasons: Vec<String>,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            backoff_coefficient: config.backoff_coefficient,
            maximum_interval: Duration::from_millis(config.maximum_interval_ms),
            maximum_attempts: config.maximum_attempts,
            non_retriable_reasons: config.non_retriable_reasons.clone(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.maximum_interval)
            .min(self.maximum_interval)
    }

    pub fn should_retry(&self, error: &ActivityError, attempt: u32) -> bool {
        if matches!(error, ActivityError::NotRegistered(_)) {
            return false;
        }
        if self
            .non_retriable_reasons
            .iter()
            .any(|reason| reason == error.reason())
        {
            return false;
        }
        self.maximum_attempts == 0 || attempt < self.maximum_attempts
    }
}

/// Metadata handed to a running activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub activity: String,
    pub execution: ExecutionIdentity,
    pub attempt: u32,
}

/// Per-attempt handle given to an activity.
pub struct ActivityContext {
    info: ActivityInfo,
    beats: watch::Sender<u64>,
}

impl ActivityContext {
    fn new(info: ActivityInfo, beats: watch::Sender<u64>) -> Self {
        Self { info, beats }
    }

    /// A context whose heartbeats go nowhere, for calling an activity
    /// outside the invoker.
    pub fn detached(info: ActivityInfo) -> Self {
        let (beats, _) = watch::channel(0);
        Self::new(info, beats)
    }

    pub fn info(&self) -> &ActivityInfo {
        &self.info
    }

    /// Reports liveness. Long-running activities must call this at least once
    /// per heartbeat timeout.
    pub fn heartbeat(&self) {
        self.beats.send_modify(|n| *n = n.wrapping_add(1));
    }
}

#[async_trait]
pub trait Activity: Send + Sync {
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

/// Adapts an async closure into an `Activity`.
pub struct FnActivity<F>(F);

#[async_trait]
impl<F, Fut> Activity for FnActivity<F>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        (self.0)(ctx, input).await
    }
}

pub fn activity_fn<F, Fut>(f: F) -> Arc<dyn Activity>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    Arc::new(FnActivity(f))
}

/// Name → implementation lookup for activities.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: Arc<DashMap<String, Arc<dyn Activity>>>,
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.activities.len())
            .finish()
    }
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, activity: Arc<dyn Activity>) {
        self.activities.insert(name.into(), activity);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).map(|r| r.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.activities.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

/// Runs registered activities on a bounded worker pool.
#[derive(Clone)]
pub struct ActivityInvoker {
    registry: ActivityRegistry,
    workers: Arc<Semaphore>,
}

impl std::fmt::Debug for ActivityInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityInvoker")
            .field("registry", &self.registry)
            .field("available_workers", &self.workers.available_permits())
            .finish()
    }
}

impl ActivityInvoker {
    pub fn new(registry: ActivityRegistry, max_concurrent: usize) -> Self {
        Self {
            registry,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Invokes `activity` with `input`, applying deadlines and the retry
    /// policy from `options`.
    pub async fn invoke(
        &self,
        execution: &ExecutionIdentity,
        activity: &str,
        input: Value,
        options: &ActivityOptions,
    ) -> Result<Value, ActivityError> {
        let handler = self
            .registry
            .get(activity)
            .ok_or_else(|| ActivityError::NotRegistered(activity.to_string()))?;

        let mut attempt = 1;
        loop {
            let info = ActivityInfo {
                activity: activity.to_string(),
                execution: execution.clone(),
                attempt,
            };
            match self.attempt(&handler, info, input.clone(), options).await {
                Ok(value) => {
                    metrics::counter!("activity.completed").increment(1);
                    return Ok(value);
                }
                Err(err) => {
                    if err.is_timeout() {
                        metrics::counter!("activity.timeouts").increment(1);
                    }
                    metrics::counter!("activity.failed").increment(1);

                    let Some(policy) = options.retry_policy.as_ref() else {
                        return Err(err);
                    };
                    if !policy.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = policy.backoff(attempt);
                    warn!(
                        activity = %activity,
                        execution_id = %execution.execution_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Activity attempt failed, retrying"
                    );
                    metrics::counter!("activity.retries").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        handler: &Arc<dyn Activity>,
        info: ActivityInfo,
        input: Value,
        options: &ActivityOptions,
    ) -> Result<Value, ActivityError> {
        let _permit = match tokio::time::timeout(
            options.schedule_to_start_timeout,
            self.workers.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(ActivityError::application(
                    "worker_pool_closed",
                    "activity worker pool is closed",
                ))
            }
            Err(_) => {
                return Err(ActivityError::ScheduleToStartTimeout(
                    options.schedule_to_start_timeout,
                ))
            }
        };

        debug!(activity = %info.activity, attempt = info.attempt, "Activity started");

        let (beats, watch_rx) = watch::channel(0u64);
        let activity = info.activity.clone();
        let ctx = ActivityContext::new(info, beats);
        let handler = handler.clone();
        let task = tokio::spawn(async move { handler.execute(ctx, input).await });
        let abort = task.abort_handle();
        let run = async move {
            task.await.unwrap_or_else(|join_err| {
                warn!(activity = %activity, error = %join_err, "Activity panicked");
                metrics::counter!("activity.panicked").increment(1);
                Err(ActivityError::application(
                    "activity_panicked",
                    format!("activity {activity} panicked"),
                ))
            })
        };

        let guarded = async {
            match options.heartbeat_timeout {
                Some(interval) => {
                    tokio::select! {
                        result = run => result,
                        lapse = heartbeat_watchdog(watch_rx, interval) => Err(lapse),
                    }
                }
                None => run.await,
            }
        };

        let outcome = match tokio::time::timeout(options.start_to_close_timeout, guarded).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::StartToCloseTimeout(
                options.start_to_close_timeout,
            )),
        };
        // A lapsed deadline leaves the attempt task running.
        abort.abort();
        outcome
    }
}

/// Resolves once the activity goes `interval` without a heartbeat. The start
/// of the attempt counts as the first beat.
async fn heartbeat_watchdog(mut beats: watch::Receiver<u64>, interval: Duration) -> ActivityError {
    loop {
        match tokio::time::timeout(interval, beats.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => {
                // The activity dropped its context and can no longer beat.
                tokio::time::sleep(interval).await;
                return ActivityError::HeartbeatTimeout(interval);
            }
            Err(_) => return ActivityError::HeartbeatTimeout(interval),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn execution() -> ExecutionIdentity {
        ExecutionIdentity::new("wf-1", "run-1")
    }

    fn fast_options() -> ActivityOptions {
        ActivityOptions {
            schedule_to_start_timeout: Duration::from_millis(200),
            start_to_close_timeout: Duration::from_millis(200),
            heartbeat_timeout: None,
            retry_policy: None,
        }
    }

    fn invoker_with(name: &str, activity: Arc<dyn Activity>) -> ActivityInvoker {
        let registry = ActivityRegistry::new();
        registry.register(name, activity);
        ActivityInvoker::new(registry, 4)
    }

    #[tokio::test]
    async fn test_invoke_returns_value() {
        let invoker = invoker_with(
            "echo",
            activity_fn(|ctx, input| async move {
                assert_eq!(ctx.info().attempt, 1);
                Ok(json!({"echo": input}))
            }),
        );
        let value = invoker
            .invoke(&execution(), "echo", json!(7), &fast_options())
            .await
            .unwrap();
        assert_eq!(value, json!({"echo": 7}));
    }

    #[tokio::test]
    async fn test_unregistered_activity() {
        let invoker = ActivityInvoker::new(ActivityRegistry::new(), 1);
        let err = invoker
            .invoke(&execution(), "missing", Value::Null, &fast_options())
            .await
            .unwrap_err();
        assert_eq!(err, ActivityError::NotRegistered("missing".into()));
    }

    #[tokio::test]
    async fn test_panicking_activity_is_a_failure() {
        let invoker = invoker_with(
            "explode",
            activity_fn(|_ctx, input| async move {
                let screens: Vec<Value> = Vec::new();
                let index = input["index"].as_u64().unwrap_or(0) as usize;
                Ok(screens[index].clone())
            }),
        );
        let err = invoker
            .invoke(&execution(), "explode", json!({"index": 0}), &fast_options())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "activity_panicked");

        // The worker slot is released after the panic.
        assert_eq!(invoker.workers.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_start_to_close_timeout() {
        let invoker = invoker_with(
            "slow",
            activity_fn(|_ctx, _input| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            }),
        );
        let err = invoker
            .invoke(&execution(), "slow", Value::Null, &fast_options())
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::StartToCloseTimeout(_)));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_schedule_to_start_timeout_when_pool_is_busy() {
        let registry = ActivityRegistry::new();
        registry.register(
            "hold",
            activity_fn(|_ctx, _input| async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Value::Null)
            }),
        );
        let invoker = ActivityInvoker::new(registry, 1);
        let mut options = fast_options();
        options.start_to_close_timeout = Duration::from_secs(2);
        options.schedule_to_start_timeout = Duration::from_millis(50);

        let busy = invoker.clone();
        let busy_options = options.clone();
        let holder = tokio::spawn(async move {
            busy.invoke(&execution(), "hold", Value::Null, &busy_options)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = invoker
            .invoke(&execution(), "hold", Value::Null, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::ScheduleToStartTimeout(_)));
        assert!(holder.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_heartbeat_lapse_fails_attempt() {
        let invoker = invoker_with(
            "silent",
            activity_fn(|_ctx, _input| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(Value::Null)
            }),
        );
        let mut options = fast_options();
        options.start_to_close_timeout = Duration::from_secs(2);
        options.heartbeat_timeout = Some(Duration::from_millis(50));

        let err = invoker
            .invoke(&execution(), "silent", Value::Null, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::HeartbeatTimeout(_)));
    }

    #[tokio::test]
    async fn test_heartbeats_keep_activity_alive() {
        let invoker = invoker_with(
            "chatty",
            activity_fn(|ctx, _input| async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    ctx.heartbeat();
                }
                Ok(json!("done"))
            }),
        );
        let mut options = fast_options();
        options.start_to_close_timeout = Duration::from_secs(2);
        options.heartbeat_timeout = Some(Duration::from_millis(100));

        let value = invoker
            .invoke(&execution(), "chatty", Value::Null, &options)
            .await
            .unwrap();
        assert_eq!(value, json!("done"));
    }

    #[tokio::test]
    async fn test_failure_not_retried_without_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let invoker = invoker_with(
            "flaky",
            activity_fn(move |_ctx, _input| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ActivityError::application("backend_down", "503"))
                }
            }),
        );
        let err = invoker
            .invoke(&execution(), "flaky", Value::Null, &fast_options())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "backend_down");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_policy_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let invoker = invoker_with(
            "flaky",
            activity_fn(move |ctx, _input| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if ctx.info().attempt < 3 {
                        Err(ActivityError::application("backend_down", "503"))
                    } else {
                        Ok(json!(ctx.info().attempt))
                    }
                }
            }),
        );
        let mut options = fast_options();
        options.retry_policy = Some(RetryPolicy {
            initial_interval: Duration::from_millis(5),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_millis(20),
            maximum_attempts: 5,
            non_retriable_reasons: vec![],
        });

        let value = invoker
            .invoke(&execution(), "flaky", Value::Null, &options)
            .await
            .unwrap();
        assert_eq!(value, json!(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retriable_reason_stops_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let invoker = invoker_with(
            "rejected",
            activity_fn(move |_ctx, _input| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ActivityError::application("bad-error", "rejected"))
                }
            }),
        );
        let mut options = fast_options();
        options.retry_policy = Some(RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_millis(5),
            maximum_attempts: 5,
            non_retriable_reasons: vec!["bad-error".into()],
        });

        assert!(invoker
            .invoke(&execution(), "rejected", Value::Null, &options)
            .await
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(60),
            maximum_attempts: 0,
            non_retriable_reasons: vec![],
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(20), Duration::from_secs(60));
        assert!(policy.should_retry(&ActivityError::HeartbeatTimeout(Duration::ZERO), 100));
        assert!(!policy.should_retry(&ActivityError::NotRegistered("x".into()), 1));
    }

    #[test]
    fn test_options_from_config() {
        let options = ActivityOptions::default();
        assert_eq!(options.schedule_to_start_timeout, Duration::from_secs(60));
        assert_eq!(options.start_to_close_timeout, Duration::from_secs(60));
        assert_eq!(options.heartbeat_timeout, Some(Duration::from_secs(20)));
        assert!(options.retry_policy.is_none());

        let config = ActivityConfig {
            heartbeat_secs: 0,
            ..ActivityConfig::default()
        };
        assert!(ActivityOptions::from(&config).heartbeat_timeout.is_none());
    }
}
