use std::time::Duration;

use thiserror::Error;

/// Why a single activity call did not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    #[error("activity '{0}' is not registered")]
    NotRegistered(String),

    #[error("activity was not picked up within {0:?}")]
    ScheduleToStartTimeout(Duration),

    #[error("activity did not complete within {0:?}")]
    StartToCloseTimeout(Duration),

    #[error("activity missed its heartbeat deadline of {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("{reason}: {message}")]
    Application { reason: String, message: String },
}

impl ActivityError {
    pub fn application(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable reason, matched against a retry policy's
    /// non-retriable list.
    pub fn reason(&self) -> &str {
        match self {
            ActivityError::NotRegistered(_) => "not_registered",
            ActivityError::ScheduleToStartTimeout(_) => "schedule_to_start_timeout",
            ActivityError::StartToCloseTimeout(_) => "start_to_close_timeout",
            ActivityError::HeartbeatTimeout(_) => "heartbeat_timeout",
            ActivityError::Application { reason, .. } => reason,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ActivityError::ScheduleToStartTimeout(_)
                | ActivityError::StartToCloseTimeout(_)
                | ActivityError::HeartbeatTimeout(_)
        )
    }
}

/// Terminal failure of a journey execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JourneyError {
    #[error("activity '{activity}' failed: {source}")]
    Activity {
        activity: String,
        #[source]
        source: ActivityError,
    },

    #[error("post-signal side effect '{activity}' failed: {source}")]
    PostSignal {
        activity: String,
        #[source]
        source: ActivityError,
    },

    #[error("child execution '{execution_id}' failed: {reason}")]
    Child { execution_id: String, reason: String },

    #[error("no signal arrived on {channels:?} within {timeout:?}")]
    SignalTimeout {
        channels: Vec<String>,
        timeout: Duration,
    },

    #[error("invalid journey input: {0}")]
    InvalidInput(String),

    #[error("invalid journey definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("non-deterministic replay: {0}")]
    NonDeterministic(String),

    #[error("host error: {0}")]
    Host(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for JourneyError {
    fn from(err: serde_json::Error) -> Self {
        JourneyError::Serialization(err.to_string())
    }
}

impl JourneyError {
    /// The activity failure behind this error, if any.
    pub fn activity_error(&self) -> Option<&ActivityError> {
        match self {
            JourneyError::Activity { source, .. } | JourneyError::PostSignal { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
