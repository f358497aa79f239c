//! API server — HTTP surface over the execution host, plus the metrics
//! exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use onboarding_core::config::AppConfig;
use onboarding_host::{ExecutionHost, StartOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Builds the onboarding router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Execution endpoints
        .route("/api/start-signup-workflow", post(rest::start_workflow))
        .route("/api/submit", post(rest::submit))
        .route("/api/signal-hello-world", post(rest::signal_age))
        .route("/api/get-current-screen", post(rest::current_screen))
        .route("/api/history", post(rest::history))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    host: Arc<dyn ExecutionHost>,
}

impl ApiServer {
    pub fn new(config: AppConfig, host: Arc<dyn ExecutionHost>) -> Self {
        Self { config, host }
    }

    fn state(&self) -> AppState {
        AppState {
            host: self.host.clone(),
            start_options: StartOptions::from(&self.config.host),
            signal_channel: self.config.signal.channel.clone(),
            start_time: Instant::now(),
        }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting Server! Listening");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the Prometheus exporter on its own port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
