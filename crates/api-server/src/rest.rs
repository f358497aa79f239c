//! REST handlers for starting, signalling and inspecting onboarding
//! executions, plus operational endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use onboarding_core::{ExecutionIdentity, HistoryEvent, SignalPayload};
use onboarding_host::{ExecutionHost, StartOptions};
use onboarding_journey::{WorkflowState, STATE_QUERY};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// Journey started when the caller does not name one.
pub const DEFAULT_JOURNEY: &str = "applicant_onboarding";

/// Maximum length accepted for ids passed in by callers.
const MAX_ID_LEN: usize = 256;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<dyn ExecutionHost>,
    pub start_options: StartOptions,
    pub signal_channel: String,
    pub start_time: Instant,
}

/// A failed start, signal or query. Rendered as `400` with a fixed JSON
/// string body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiError(pub &'static str);

pub const START_FAILED: ApiError = ApiError("Error starting workflow!");
pub const SIGNAL_FAILED: ApiError = ApiError("Error signaling workflow!");
pub const QUERY_FAILED: ApiError = ApiError("Error querying workflow!");
pub const INVALID_REQUEST: ApiError = ApiError("Invalid request!");

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self.0)).into_response()
    }
}

fn valid_id(id: &str) -> bool {
    !id.trim().is_empty() && id.len() <= MAX_ID_LEN
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    #[serde(default)]
    pub account_id: String,
    pub journey: Option<String>,
}

/// POST /api/start-signup-workflow — starts a journey for an applicant.
pub async fn start_workflow(
    State(state): State<AppState>,
    Query(params): Query<StartParams>,
) -> Result<Json<ExecutionIdentity>, ApiError> {
    if !valid_id(&params.account_id) {
        warn!("Start request without a valid accountId");
        metrics::counter!("api.validation_errors").increment(1);
        return Err(START_FAILED);
    }
    let journey = params.journey.as_deref().unwrap_or(DEFAULT_JOURNEY);

    let identity = state
        .host
        .start(
            state.start_options.clone(),
            journey,
            json!({ "applicantId": params.account_id }),
        )
        .await
        .map_err(|e| {
            error!(error = %e, journey = %journey, "Failed to start workflow");
            metrics::counter!("api.errors").increment(1);
            START_FAILED
        })?;

    info!(
        workflow_id = %identity.execution_id,
        run_id = %identity.run_id,
        journey = %journey,
        "Started work flow!"
    );
    Ok(Json(identity))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    pub applicant_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// POST /api/submit — delivers a stage submission to a waiting execution.
pub async fn submit(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<&'static str>, ApiError> {
    let Json(request) = body.map_err(|e| {
        warn!(error = %e, "Rejected submit body");
        metrics::counter!("api.validation_errors").increment(1);
        INVALID_REQUEST
    })?;
    if !valid_id(&request.workflow_id) || !valid_id(&request.applicant_id) {
        metrics::counter!("api.validation_errors").increment(1);
        return Err(INVALID_REQUEST);
    }

    let signal = SignalPayload {
        execution_id: request.workflow_id.clone(),
        run_id: request.run_id.clone().unwrap_or_default(),
        applicant_id: request.applicant_id,
        payload: request.payload,
    };
    deliver(&state, &request.workflow_id, request.run_id.as_deref(), &signal).await?;
    Ok(Json("Success"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeParams {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub age: String,
}

/// POST /api/signal-hello-world — signals an age value on the stage channel.
pub async fn signal_age(
    State(state): State<AppState>,
    Query(params): Query<AgeParams>,
) -> Result<Json<&'static str>, ApiError> {
    let age: i64 = params.age.trim().parse().map_err(|_| {
        warn!(workflow_id = %params.workflow_id, "Failed to parse age from request!");
        metrics::counter!("api.validation_errors").increment(1);
        SIGNAL_FAILED
    })?;
    if !valid_id(&params.workflow_id) {
        return Err(SIGNAL_FAILED);
    }

    let signal = SignalPayload {
        execution_id: params.workflow_id.clone(),
        run_id: String::new(),
        applicant_id: params.workflow_id.clone(),
        payload: json!({ "age": age }),
    };
    deliver(&state, &params.workflow_id, None, &signal).await?;
    Ok(Json("Success"))
}

async fn deliver(
    state: &AppState,
    workflow_id: &str,
    run_id: Option<&str>,
    signal: &SignalPayload,
) -> Result<(), ApiError> {
    let payload = serde_json::to_value(signal).map_err(|_| SIGNAL_FAILED)?;
    state
        .host
        .signal(workflow_id, run_id, &state.signal_channel, payload)
        .await
        .map_err(|e| {
            error!(error = %e, workflow_id = %workflow_id, "Failed to signal workflow");
            metrics::counter!("api.errors").increment(1);
            SIGNAL_FAILED
        })?;
    info!(
        workflow_id = %workflow_id,
        applicant_id = %signal.applicant_id,
        "Signaled work flow with the following params!"
    );
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionParams {
    #[serde(default)]
    pub workflow_id: String,
    pub run_id: Option<String>,
}

/// POST /api/get-current-screen — the action the execution is currently on.
pub async fn current_screen(
    State(state): State<AppState>,
    Query(params): Query<ExecutionParams>,
) -> Result<Json<String>, ApiError> {
    if !valid_id(&params.workflow_id) {
        return Err(QUERY_FAILED);
    }
    let value = state
        .host
        .query(&params.workflow_id, STATE_QUERY)
        .await
        .map_err(|e| {
            warn!(error = %e, workflow_id = %params.workflow_id, "State query failed");
            QUERY_FAILED
        })?;
    let snapshot: WorkflowState = serde_json::from_value(value).map_err(|e| {
        error!(error = %e, workflow_id = %params.workflow_id, "Malformed state snapshot");
        QUERY_FAILED
    })?;
    Ok(Json(snapshot.current.action))
}

/// POST /api/history — the recorded event log of an execution.
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<ExecutionParams>,
) -> Result<Json<Vec<HistoryEvent>>, ApiError> {
    if !valid_id(&params.workflow_id) {
        return Err(QUERY_FAILED);
    }
    let run_id = params.run_id.as_deref().filter(|r| !r.is_empty());
    let events = state
        .host
        .history(&params.workflow_id, run_id)
        .await
        .map_err(|e| {
            warn!(error = %e, workflow_id = %params.workflow_id, "History lookup failed");
            QUERY_FAILED
        })?;
    Ok(Json(events))
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        task_queue: state.start_options.task_queue.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub task_queue: String,
    pub uptime_secs: u64,
}
