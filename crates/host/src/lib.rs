//! Execution hosting for onboarding journeys: the host API, an in-process
//! host backed by tokio tasks, and history replay.

pub mod client;
pub mod error;
pub mod local;
pub mod replay;

pub use client::{ExecutionHost, ExecutionOutcome, StartOptions};
pub use error::{HostError, HostResult};
pub use local::LocalHost;
pub use replay::{replay, ReplayOutcome};
