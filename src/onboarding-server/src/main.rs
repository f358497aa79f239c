//! Onboarding server — runs applicant onboarding journeys on an in-process
//! execution host and serves the HTTP API in front of it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use onboarding_api::ApiServer;
use onboarding_backend::{register_onboarding_activities, BackendClient};
use onboarding_core::config::AppConfig;
use onboarding_host::LocalHost;
use onboarding_journey::catalog::{onboarding_registry, JourneySettings};
use onboarding_journey::{ActivityInvoker, ActivityRegistry};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "onboarding-server")]
#[command(about = "Durable applicant onboarding journey orchestrator")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still apply on top)
    #[arg(long, env = "ONBOARDING_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port (overrides config)
    #[arg(long, env = "ONBOARDING__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Task queue executions are started on (overrides config)
    #[arg(long, env = "ONBOARDING__HOST__TASK_QUEUE")]
    task_queue: Option<String>,

    /// Backend base URL (overrides config)
    #[arg(long, env = "ONBOARDING__BACKEND__BASE_URL")]
    backend_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "onboarding_server=info,onboarding_journey=info,onboarding_host=info,tower_http=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Onboarding server starting up");

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(queue) = cli.task_queue {
        config.host.task_queue = queue;
    }
    if let Some(url) = cli.backend_url {
        config.backend.base_url = url;
    }

    info!(
        http_port = config.api.http_port,
        task_queue = %config.host.task_queue,
        backend = %config.backend.base_url,
        retry_enabled = config.activity.retry.is_some(),
        "Configuration loaded"
    );

    // Activities and journeys
    let backend = BackendClient::new(&config.backend)?;
    let activities = ActivityRegistry::new();
    register_onboarding_activities(&activities, backend);
    let journeys = onboarding_registry(&JourneySettings::from(&config))?;
    info!(journeys = ?journeys.names(), activities = ?activities.names(), "Worker registered");

    let host = LocalHost::new(
        journeys,
        ActivityInvoker::new(activities, config.host.max_concurrent_activities),
    )
    .with_retention(config.host.retained_executions);

    let api_server = ApiServer::new(config.clone(), Arc::new(host));

    // Start metrics exporter
    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics().await {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("Onboarding server is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
