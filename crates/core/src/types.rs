use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one durable execution. Assigned by the host at start and
/// immutable for the life of the execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionIdentity {
    pub execution_id: String,
    pub run_id: String,
}

impl ExecutionIdentity {
    pub fn new(execution_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for ExecutionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.execution_id, self.run_id)
    }
}

/// A typed message delivered to a running execution on a named channel.
///
/// Senders may leave out the execution identity (it is implied by the
/// target of the delivery) but must always name the applicant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub run_id: String,
    pub applicant_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SignalPayload {
    pub fn new(applicant_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            execution_id: String::new(),
            run_id: String::new(),
            applicant_id: applicant_id.into(),
            payload,
        }
    }

    /// Decodes a raw delivery. An empty applicant id is rejected along with
    /// structurally invalid input.
    pub fn decode(raw: &serde_json::Value) -> Result<Self, SignalDecodeError> {
        let signal: SignalPayload = serde_json::from_value(raw.clone())
            .map_err(|e| SignalDecodeError(e.to_string()))?;
        if signal.applicant_id.trim().is_empty() {
            return Err(SignalDecodeError("applicantId must not be empty".into()));
        }
        Ok(signal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed signal payload: {0}")]
pub struct SignalDecodeError(pub String);

/// Lifecycle of an execution as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// One entry of an execution's ordered event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase", tag = "type")]
pub enum EventKind {
    ExecutionStarted {
        journey: String,
        input: serde_json::Value,
    },
    ActivityScheduled {
        activity: String,
        input: serde_json::Value,
    },
    ActivityCompleted {
        activity: String,
        result: serde_json::Value,
    },
    ActivityFailed {
        activity: String,
        reason: String,
    },
    SignalReceived {
        channel: String,
        payload: serde_json::Value,
    },
    SignalConsumed {
        channel: String,
        payload: serde_json::Value,
    },
    SignalWaitTimedOut {
        channels: Vec<String>,
    },
    ChildStarted {
        execution_id: String,
        journey: String,
    },
    ChildCompleted {
        execution_id: String,
        result: serde_json::Value,
    },
    ChildFailed {
        execution_id: String,
        reason: String,
    },
    ExecutionCompleted {
        result: serde_json::Value,
    },
    ExecutionFailed {
        reason: String,
    },
    ExecutionTimedOut,
}

impl EventKind {
    /// Stable label used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted { .. } => "execution_started",
            EventKind::ActivityScheduled { .. } => "activity_scheduled",
            EventKind::ActivityCompleted { .. } => "activity_completed",
            EventKind::ActivityFailed { .. } => "activity_failed",
            EventKind::SignalReceived { .. } => "signal_received",
            EventKind::SignalConsumed { .. } => "signal_consumed",
            EventKind::SignalWaitTimedOut { .. } => "signal_wait_timed_out",
            EventKind::ChildStarted { .. } => "child_started",
            EventKind::ChildCompleted { .. } => "child_completed",
            EventKind::ChildFailed { .. } => "child_failed",
            EventKind::ExecutionCompleted { .. } => "execution_completed",
            EventKind::ExecutionFailed { .. } => "execution_failed",
            EventKind::ExecutionTimedOut => "execution_timed_out",
        }
    }

    /// Events that record an outcome the journey code observed. Replay
    /// consumes exactly these, in order.
    pub fn is_decision_input(&self) -> bool {
        matches!(
            self,
            EventKind::ActivityCompleted { .. }
                | EventKind::ActivityFailed { .. }
                | EventKind::SignalConsumed { .. }
                | EventKind::SignalWaitTimedOut { .. }
                | EventKind::ChildCompleted { .. }
                | EventKind::ChildFailed { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_decode_accepts_partial_identity() {
        let raw = json!({"applicantId": "A1", "payload": {"age": 61}});
        let signal = SignalPayload::decode(&raw).unwrap();
        assert_eq!(signal.applicant_id, "A1");
        assert_eq!(signal.payload["age"], 61);
        assert!(signal.execution_id.is_empty());
    }

    #[test]
    fn test_signal_decode_rejects_malformed() {
        assert!(SignalPayload::decode(&json!(61)).is_err());
        assert!(SignalPayload::decode(&json!({"payload": {}})).is_err());
        assert!(SignalPayload::decode(&json!({"applicantId": "  "})).is_err());
    }

    #[test]
    fn test_identity_serializes_camel_case() {
        let id = ExecutionIdentity::new("wf-1", "run-1");
        let value = serde_json::to_value(&id).unwrap();
        assert_eq!(value, json!({"executionId": "wf-1", "runId": "run-1"}));
        assert_eq!(id.to_string(), "wf-1/run-1");
    }

    #[test]
    fn test_history_event_serializes_camel_case() {
        let event = HistoryEvent {
            event_id: 3,
            timestamp: Utc::now(),
            kind: EventKind::ChildStarted {
                execution_id: "signup:run-1".into(),
                journey: "signup".into(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["eventId", "kind", "timestamp"]);
        assert_eq!(
            value["kind"],
            json!({"type": "child_started", "executionId": "signup:run-1", "journey": "signup"})
        );

        let back: HistoryEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_kind_tagging() {
        let kind = EventKind::SignalWaitTimedOut {
            channels: vec!["submit".into()],
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "signal_wait_timed_out");
        assert!(kind.is_decision_input());
        assert!(!EventKind::ExecutionTimedOut.is_decision_input());
    }
}
