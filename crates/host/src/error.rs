use onboarding_journey::JourneyError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("execution '{0}' is already running")]
    AlreadyStarted(String),

    #[error("unknown journey '{0}'")]
    UnknownJourney(String),

    #[error("execution '{0}' not found")]
    NotFound(String),

    #[error("execution '{execution_id}' has no run '{run_id}'")]
    RunMismatch { execution_id: String, run_id: String },

    #[error("execution '{0}' is not running")]
    NotRunning(String),

    #[error("execution '{execution_id}' has no query handler for '{query_type}'")]
    UnknownQuery {
        execution_id: String,
        query_type: String,
    },

    #[error("query '{query_type}' failed: {reason}")]
    QueryFailed { query_type: String, reason: String },

    #[error("journey error: {0}")]
    Journey(#[from] JourneyError),
}

pub type HostResult<T> = Result<T, HostError>;
