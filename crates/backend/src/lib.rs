//! Backend integration: the HTTP client for applicant profile updates and
//! the activities onboarding journeys call through it.

pub mod activities;
pub mod client;
pub mod error;

pub use activities::{register_onboarding_activities, ProfileSyncActivity, ScreenActivity};
pub use client::{BackendClient, ProfileUpdate};
pub use error::BackendError;
