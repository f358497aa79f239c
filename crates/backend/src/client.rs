use onboarding_core::config::BackendConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::BackendError;

/// Body of every backend update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub applicant_id: String,
    pub profile_attributes: Value,
}

impl ProfileUpdate {
    pub fn new(applicant_id: impl Into<String>, profile_attributes: Value) -> Self {
        Self {
            applicant_id: applicant_id.into(),
            profile_attributes,
        }
    }
}

/// Sends applicant updates to the onboarding backend. Only the response
/// status is observed.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    profile_url: String,
    screen_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(10)
            .build()?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            profile_url: format!("{base}{}", config.profile_path),
            screen_url: format!("{base}{}", config.screen_path),
        })
    }

    pub fn profile_url(&self) -> &str {
        &self.profile_url
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), BackendError> {
        self.patch(&self.profile_url, update).await
    }

    /// Asks the frontend-facing backend to present `screen` to the applicant.
    pub async fn show_screen(&self, applicant_id: &str, screen: &str) -> Result<(), BackendError> {
        let update = ProfileUpdate::new(
            applicant_id,
            serde_json::json!({ "current_screen": screen }),
        );
        self.patch(&self.screen_url, &update).await
    }

    async fn patch(&self, url: &str, update: &ProfileUpdate) -> Result<(), BackendError> {
        let response = self.http.patch(url).json(update).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(
                url = %url,
                applicant_id = %update.applicant_id,
                status = status.as_u16(),
                "Backend rejected update"
            );
            metrics::counter!("backend.rejected").increment(1);
            return Err(BackendError::Rejected {
                status: status.as_u16(),
            });
        }
        debug!(url = %url, applicant_id = %update.applicant_id, "Backend update accepted");
        metrics::counter!("backend.updates").increment(1);
        Ok(())
    }
}
