use thiserror::Error;

pub type OnboardingResult<T> = Result<T, OnboardingError>;

#[derive(Error, Debug)]
pub enum OnboardingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for OnboardingError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
