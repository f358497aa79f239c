//! Re-runs journey code against a recorded history.
//!
//! Outcomes come from the history, never from live work, so a journey that
//! only talks to the world through its `WorkflowContext` reproduces the same
//! state on every replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onboarding_core::{EventKind, ExecutionIdentity, HistoryEvent};
use onboarding_journey::{
    ActivityError, ActivityOptions, ChildOptions, Journey, JourneyError, QueryHandler,
    SignalDelivery, WorkflowContext, WorkflowState, STATE_QUERY,
};
use parking_lot::Mutex;
use serde_json::Value;

/// Result of replaying one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub state: WorkflowState,
    /// `None` when the history ends while the journey is still waiting.
    pub result: Option<Result<Value, JourneyError>>,
}

struct ReplayCursor {
    events: Vec<EventKind>,
    position: usize,
    exhausted: bool,
}

struct ReplayContext {
    identity: ExecutionIdentity,
    journey: String,
    cursor: Mutex<ReplayCursor>,
    queries: Mutex<HashMap<String, QueryHandler>>,
}

impl ReplayContext {
    fn next(&self, expected: &str) -> Result<EventKind, JourneyError> {
        let mut cursor = self.cursor.lock();
        match cursor.events.get(cursor.position).cloned() {
            Some(kind) => {
                cursor.position += 1;
                Ok(kind)
            }
            None => {
                cursor.exhausted = true;
                Err(JourneyError::Host(format!(
                    "history ends before {expected}"
                )))
            }
        }
    }

    fn unexpected(expected: &str, found: &EventKind) -> JourneyError {
        JourneyError::NonDeterministic(format!(
            "expected {expected}, history has {}",
            found.name()
        ))
    }
}

#[async_trait]
impl WorkflowContext for ReplayContext {
    fn identity(&self) -> &ExecutionIdentity {
        &self.identity
    }

    fn journey(&self) -> &str {
        &self.journey
    }

    fn is_replaying(&self) -> bool {
        true
    }

    async fn execute_activity(
        &self,
        activity: &str,
        _input: Value,
        _options: &ActivityOptions,
    ) -> Result<Value, JourneyError> {
        let expected = format!("outcome of activity '{activity}'");
        match self.next(&expected)? {
            EventKind::ActivityCompleted {
                activity: recorded,
                result,
            } if recorded == activity => Ok(result),
            EventKind::ActivityFailed {
                activity: recorded,
                reason,
            } if recorded == activity => Err(JourneyError::Activity {
                activity: recorded,
                source: ActivityError::application(reason, "recorded failure"),
            }),
            other => Err(Self::unexpected(&expected, &other)),
        }
    }

    async fn receive_signal(
        &self,
        channels: &[String],
        _timeout: Option<Duration>,
    ) -> Result<Option<SignalDelivery>, JourneyError> {
        let expected = format!("signal on {channels:?}");
        match self.next(&expected)? {
            EventKind::SignalConsumed { channel, payload } if channels.contains(&channel) => {
                Ok(Some(SignalDelivery { channel, payload }))
            }
            EventKind::SignalWaitTimedOut { channels: recorded } if recorded == channels => {
                Ok(None)
            }
            other => Err(Self::unexpected(&expected, &other)),
        }
    }

    async fn execute_child(
        &self,
        journey: &str,
        options: ChildOptions,
        _input: Value,
    ) -> Result<Value, JourneyError> {
        let expected = format!("outcome of child '{journey}' ({})", options.execution_id);
        match self.next(&expected)? {
            EventKind::ChildCompleted {
                execution_id,
                result,
            } if execution_id == options.execution_id => Ok(result),
            EventKind::ChildFailed {
                execution_id,
                reason,
            } if execution_id == options.execution_id => {
                Err(JourneyError::Child {
                    execution_id,
                    reason,
                })
            }
            other => Err(Self::unexpected(&expected, &other)),
        }
    }

    fn set_query_handler(&self, query_type: &str, handler: QueryHandler) {
        self.queries.lock().insert(query_type.to_string(), handler);
    }
}

/// Replays `history` through `journey` and returns the state it rebuilds.
///
/// The history must start with the run's `ExecutionStarted` event. A journey
/// that asks for an outcome the history does not hold at that position, or
/// that finishes with recorded outcomes left over, is non-deterministic.
pub async fn replay(
    journey: Arc<dyn Journey>,
    identity: ExecutionIdentity,
    history: &[HistoryEvent],
) -> Result<ReplayOutcome, JourneyError> {
    let input = match history.first().map(|e| &e.kind) {
        Some(EventKind::ExecutionStarted {
            journey: recorded,
            input,
        }) if recorded == journey.name() => input.clone(),
        Some(other) => {
            return Err(ReplayContext::unexpected(
                &format!("start of journey '{}'", journey.name()),
                other,
            ))
        }
        None => return Err(JourneyError::NonDeterministic("history is empty".into())),
    };

    let ctx = ReplayContext {
        identity,
        journey: journey.name().to_string(),
        cursor: Mutex::new(ReplayCursor {
            events: history
                .iter()
                .map(|e| e.kind.clone())
                .filter(EventKind::is_decision_input)
                .collect(),
            position: 0,
            exhausted: false,
        }),
        queries: Mutex::new(HashMap::new()),
    };

    let outcome = journey.run(&ctx, input).await;

    let (exhausted, leftover) = {
        let cursor = ctx.cursor.lock();
        (cursor.exhausted, cursor.events.len() - cursor.position)
    };
    if let Err(err @ JourneyError::NonDeterministic(_)) = &outcome {
        return Err(err.clone());
    }
    if !exhausted && leftover > 0 {
        return Err(JourneyError::NonDeterministic(format!(
            "journey finished with {leftover} recorded outcomes unconsumed"
        )));
    }

    let handler = ctx.queries.lock().get(STATE_QUERY).cloned();
    let state = match handler {
        Some(handler) => serde_json::from_value(handler()?)?,
        None => journey.initial_state()?,
    };
    Ok(ReplayOutcome {
        state,
        result: if exhausted { None } else { Some(outcome) },
    })
}
