//! Activities backing the onboarding catalog.

use std::sync::Arc;

use async_trait::async_trait;
use onboarding_journey::catalog::{SCREEN_ACTIVITIES, SYNC_PROFILE};
use onboarding_journey::{Activity, ActivityContext, ActivityError, ActivityRegistry};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::client::{BackendClient, ProfileUpdate};
use crate::error::BackendError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageInput {
    applicant_id: String,
    action: String,
    #[serde(default)]
    payload: Value,
}

fn decode(input: Value) -> Result<StageInput, BackendError> {
    serde_json::from_value(input).map_err(|e| BackendError::InvalidInput(e.to_string()))
}

/// Presents one onboarding screen to the applicant.
pub struct ScreenActivity {
    client: BackendClient,
}

impl ScreenActivity {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Activity for ScreenActivity {
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input = decode(input)?;
        let screen = ctx.info().activity.clone();
        info!(
            activity = %screen,
            applicant_id = %input.applicant_id,
            attempt = ctx.info().attempt,
            "Screen activity started"
        );
        self.client
            .show_screen(&input.applicant_id, &screen)
            .await?;
        ctx.heartbeat();
        info!(activity = %screen, applicant_id = %input.applicant_id, "Screen activity ended");
        Ok(Value::String(format!(
            "{} activity ended",
            screen.replace('_', " ")
        )))
    }
}

/// Writes the payload of the signal a stage resumed on to the applicant
/// profile.
pub struct ProfileSyncActivity {
    client: BackendClient,
}

impl ProfileSyncActivity {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Activity for ProfileSyncActivity {
    async fn execute(&self, _ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input = decode(input)?;
        self.client
            .update_profile(&ProfileUpdate::new(&input.applicant_id, input.payload))
            .await?;
        info!(
            applicant_id = %input.applicant_id,
            stage = %input.action,
            "Applicant profile synced"
        );
        Ok(Value::String("BE call function ended".into()))
    }
}

/// Registers every activity the onboarding catalog references.
pub fn register_onboarding_activities(registry: &ActivityRegistry, client: BackendClient) {
    let screen: Arc<dyn Activity> = Arc::new(ScreenActivity::new(client.clone()));
    for name in SCREEN_ACTIVITIES {
        registry.register(*name, screen.clone());
    }
    registry.register(SYNC_PROFILE, Arc::new(ProfileSyncActivity::new(client)));
}
