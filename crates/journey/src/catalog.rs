//! The applicant onboarding journeys and the activities they call.

use std::sync::Arc;
use std::time::Duration;

use onboarding_core::AppConfig;

use crate::activity::ActivityOptions;
use crate::composer::{ChildJourney, JourneyComposer};
use crate::engine::JourneyRegistry;
use crate::error::JourneyError;
use crate::state_machine::{StageMachine, StageSpec};

pub const ONBOARDING_JOURNEY: &str = "applicant_onboarding";
pub const SIGNUP_JOURNEY: &str = "signup";
pub const LEAD_JOURNEY: &str = "lead";
pub const APPLICATION_JOURNEY: &str = "application";

pub const DEGREE_DETAILS: &str = "degree_details";
pub const WATCH_VIDEO: &str = "watch_video";
pub const OVERVIEW: &str = "overview";
pub const STATEMENT_OF_PURPOSE: &str = "statement_of_purpose";
pub const ASSESSMENT: &str = "assessment";
pub const SYNC_PROFILE: &str = "sync_profile";

/// Activities that present a screen to the applicant.
pub const SCREEN_ACTIVITIES: &[&str] = &[
    DEGREE_DETAILS,
    WATCH_VIDEO,
    OVERVIEW,
    STATEMENT_OF_PURPOSE,
    ASSESSMENT,
];

/// Tunables shared by every onboarding journey.
#[derive(Debug, Clone)]
pub struct JourneySettings {
    pub activity_options: ActivityOptions,
    pub child_timeout: Duration,
    pub signal_channel: String,
    pub signal_timeout: Option<Duration>,
}

impl Default for JourneySettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for JourneySettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            activity_options: ActivityOptions::from(&config.activity),
            child_timeout: config.child.execution_timeout(),
            signal_channel: config.signal.channel.clone(),
            signal_timeout: config.signal.wait_timeout(),
        }
    }
}

fn screen(settings: &JourneySettings, action: &str, index: u32) -> StageSpec {
    StageSpec::new(action, index, action)
        .with_signal(settings.signal_channel.clone())
        .with_post_signal(SYNC_PROFILE)
}

fn stage_machine(settings: &JourneySettings, name: &str, stages: Vec<StageSpec>) -> StageMachine {
    StageMachine::new(name, stages, settings.activity_options.clone())
        .with_signal_timeout(settings.signal_timeout)
}

pub fn signup_journey(settings: &JourneySettings) -> StageMachine {
    stage_machine(
        settings,
        SIGNUP_JOURNEY,
        vec![
            screen(settings, DEGREE_DETAILS, 1),
            screen(settings, WATCH_VIDEO, 2),
        ],
    )
}

pub fn lead_journey(settings: &JourneySettings) -> StageMachine {
    stage_machine(settings, LEAD_JOURNEY, vec![screen(settings, OVERVIEW, 1)])
}

pub fn application_journey(settings: &JourneySettings) -> StageMachine {
    stage_machine(
        settings,
        APPLICATION_JOURNEY,
        vec![
            screen(settings, STATEMENT_OF_PURPOSE, 1),
            screen(settings, ASSESSMENT, 2),
        ],
    )
}

pub fn onboarding_journey(settings: &JourneySettings) -> JourneyComposer {
    JourneyComposer::new(
        ONBOARDING_JOURNEY,
        vec![
            ChildJourney::new(SIGNUP_JOURNEY, 1, SIGNUP_JOURNEY),
            ChildJourney::new(LEAD_JOURNEY, 2, LEAD_JOURNEY),
            ChildJourney::new(APPLICATION_JOURNEY, 3, APPLICATION_JOURNEY),
        ],
        settings.child_timeout,
        settings.signal_channel.clone(),
    )
    .with_signal_timeout(settings.signal_timeout)
}

/// Registry holding the composite onboarding journey and its three children.
pub fn onboarding_registry(settings: &JourneySettings) -> Result<JourneyRegistry, JourneyError> {
    let registry = JourneyRegistry::new();
    registry.register(Arc::new(signup_journey(settings)))?;
    registry.register(Arc::new(lead_journey(settings)))?;
    registry.register(Arc::new(application_journey(settings)))?;
    registry.register(Arc::new(onboarding_journey(settings)))?;
    Ok(registry)
}
