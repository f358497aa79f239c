use onboarding_journey::ActivityError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend rejected the update with status {status}")]
    Rejected { status: u16 },

    #[error("invalid activity input: {0}")]
    InvalidInput(String),
}

impl From<BackendError> for ActivityError {
    fn from(err: BackendError) -> Self {
        let reason = match &err {
            BackendError::Transport(_) => "backend_unavailable",
            BackendError::Rejected { .. } => "backend_rejected",
            BackendError::InvalidInput(_) => "invalid_input",
        };
        ActivityError::application(reason, err.to_string())
    }
}
