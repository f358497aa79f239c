pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use error::{OnboardingError, OnboardingResult};
pub use types::{EventKind, ExecutionIdentity, ExecutionStatus, HistoryEvent, SignalPayload};
