use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::OnboardingResult;

/// Root application configuration. Loaded from environment variables
/// with the prefix `ONBOARDING__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub child: ChildConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Settings for the execution host the orchestrator runs on.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: usize,
    /// Finished runs kept for history and state queries before the oldest
    /// are evicted.
    #[serde(default = "default_retained_executions")]
    pub retained_executions: usize,
}

/// Bounds applied to every activity call.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_schedule_to_start_secs")]
    pub schedule_to_start_secs: u64,
    #[serde(default = "default_start_to_close_secs")]
    pub start_to_close_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// No retries unless a policy is configured.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    #[serde(default = "default_maximum_interval_ms")]
    pub maximum_interval_ms: u64,
    #[serde(default = "default_maximum_attempts")]
    pub maximum_attempts: u32,
    #[serde(default)]
    pub non_retriable_reasons: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildConfig {
    #[serde(default = "default_child_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_signal_channel")]
    pub channel: String,
    /// Unbounded when unset.
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
    #[serde(default = "default_screen_path")]
    pub screen_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    3030
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_task_queue() -> String {
    "helloWorldGroup".to_string()
}
fn default_execution_timeout_secs() -> u64 {
    86_400
}
fn default_max_concurrent_activities() -> usize {
    64
}
fn default_retained_executions() -> usize {
    10_000
}
fn default_schedule_to_start_secs() -> u64 {
    60
}
fn default_start_to_close_secs() -> u64 {
    60
}
fn default_heartbeat_secs() -> u64 {
    20
}
fn default_initial_interval_ms() -> u64 {
    1000
}
fn default_backoff_coefficient() -> f64 {
    2.0
}
fn default_maximum_interval_ms() -> u64 {
    60_000
}
fn default_maximum_attempts() -> u32 {
    5
}
fn default_child_execution_timeout_secs() -> u64 {
    3600
}
fn default_signal_channel() -> String {
    "submit".to_string()
}
fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_profile_path() -> String {
    "/applicants/profile".to_string()
}
fn default_screen_path() -> String {
    "/applicants/screen".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            task_queue: default_task_queue(),
            execution_timeout_secs: default_execution_timeout_secs(),
            max_concurrent_activities: default_max_concurrent_activities(),
            retained_executions: default_retained_executions(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            schedule_to_start_secs: default_schedule_to_start_secs(),
            start_to_close_secs: default_start_to_close_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            retry: None,
        }
    }
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_child_execution_timeout_secs(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            channel: default_signal_channel(),
            wait_timeout_secs: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            profile_path: default_profile_path(),
            screen_path: default_screen_path(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            host: HostConfig::default(),
            activity: ActivityConfig::default(),
            child: ChildConfig::default(),
            signal: SignalConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl ChildConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl SignalConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load() -> OnboardingResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, with environment
    /// variables taking precedence.
    pub fn load_from(path: Option<&Path>) -> OnboardingResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ONBOARDING")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("activity.retry.non_retriable_reasons"),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from TOML text, ignoring the environment.
    pub fn from_toml(source: &str) -> OnboardingResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 3030);
        assert_eq!(config.host.task_queue, "helloWorldGroup");
        assert_eq!(config.host.execution_timeout(), Duration::from_secs(86_400));
        assert_eq!(config.host.retained_executions, 10_000);
        assert_eq!(config.activity.schedule_to_start_secs, 60);
        assert_eq!(config.activity.start_to_close_secs, 60);
        assert_eq!(config.activity.heartbeat_secs, 20);
        assert!(config.activity.retry.is_none());
        assert_eq!(config.child.execution_timeout(), Duration::from_secs(3600));
        assert_eq!(config.signal.channel, "submit");
        assert!(config.signal.wait_timeout().is_none());
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [api]
            http_port = 8088

            [activity]
            start_to_close_secs = 5

            [activity.retry]
            maximum_attempts = 3
            non_retriable_reasons = ["backend_rejected"]

            [signal]
            wait_timeout_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.api.http_port, 8088);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.activity.start_to_close_secs, 5);
        assert_eq!(config.activity.heartbeat_secs, 20);
        let retry = config.activity.retry.unwrap();
        assert_eq!(retry.maximum_attempts, 3);
        assert_eq!(retry.initial_interval_ms, 1000);
        assert_eq!(retry.non_retriable_reasons, vec!["backend_rejected"]);
        assert_eq!(config.signal.wait_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let result = AppConfig::from_toml("[api]\nhttp_port = \"not-a-port\"\n");
        assert!(result.is_err());
    }
}
