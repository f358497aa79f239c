//! End-to-end onboarding flow through the in-process host.

use std::sync::Arc;
use std::time::Duration;

use onboarding_core::{ExecutionIdentity, ExecutionStatus};
use onboarding_host::{
    replay, ExecutionHost, ExecutionOutcome, LocalHost, ReplayOutcome, StartOptions,
};
use onboarding_journey::catalog::{self, JourneySettings};
use onboarding_journey::{
    activity_fn, child_execution_id, ActivityError, ActivityInvoker, ActivityOptions,
    ActivityRegistry, JourneyError, StepStatus, WorkflowState, STATE_QUERY,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

fn settings() -> JourneySettings {
    JourneySettings {
        activity_options: ActivityOptions {
            schedule_to_start_timeout: Duration::from_millis(500),
            start_to_close_timeout: Duration::from_millis(500),
            heartbeat_timeout: None,
            retry_policy: None,
        },
        child_timeout: Duration::from_secs(5),
        signal_channel: "submit".into(),
        signal_timeout: None,
    }
}

fn recording_activities(calls: &Calls, failing: Option<&'static str>) -> ActivityRegistry {
    let registry = ActivityRegistry::new();
    let names = catalog::SCREEN_ACTIVITIES
        .iter()
        .copied()
        .chain(std::iter::once(catalog::SYNC_PROFILE));
    for name in names {
        let calls = calls.clone();
        let label = name.to_string();
        let fail = failing == Some(name);
        registry.register(
            name,
            activity_fn(move |_ctx, input| {
                let calls = calls.clone();
                let label = label.clone();
                async move {
                    calls.lock().push((label.clone(), input));
                    if fail {
                        return Err(ActivityError::application("backend_rejected", "status 500"));
                    }
                    Ok(json!(format!("{label} activity ended")))
                }
            }),
        );
    }
    registry
}

fn host(calls: &Calls, failing: Option<&'static str>) -> LocalHost {
    let journeys = catalog::onboarding_registry(&settings()).unwrap();
    LocalHost::new(
        journeys,
        ActivityInvoker::new(recording_activities(calls, failing), 16),
    )
}

async fn start(host: &LocalHost, applicant: &str) -> ExecutionIdentity {
    host.start(
        StartOptions {
            task_queue: "helloWorldGroup".into(),
            execution_id: Some(format!("onboarding-{applicant}")),
            execution_timeout: Duration::from_secs(10),
        },
        catalog::ONBOARDING_JOURNEY,
        json!({"applicantId": applicant}),
    )
    .await
    .unwrap()
}

async fn wait_running(host: &LocalHost, execution_id: &str) {
    for _ in 0..400 {
        if let Ok(ExecutionStatus::Running) = host.describe(execution_id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{execution_id} never started");
}

async fn state_of(host: &LocalHost, execution_id: &str) -> WorkflowState {
    serde_json::from_value(host.query(execution_id, STATE_QUERY).await.unwrap()).unwrap()
}

async fn wait_for_current(host: &LocalHost, execution_id: &str, action: &str) -> WorkflowState {
    for _ in 0..400 {
        if let Ok(value) = host.query(execution_id, STATE_QUERY).await {
            let state: WorkflowState = serde_json::from_value(value).unwrap();
            if state.current.action == action {
                return state;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{execution_id} never reached {action}");
}

/// Replays the parent's recorded history through its registered journey.
async fn replay_parent(host: &LocalHost, parent: &ExecutionIdentity) -> ReplayOutcome {
    let journey = host.journeys().get(catalog::ONBOARDING_JOURNEY).unwrap();
    let history = host.history(&parent.execution_id, None).await.unwrap();
    assert!(history
        .iter()
        .any(|e| e.kind.name() == "child_completed" || e.kind.name() == "child_failed"));
    replay(journey, parent.clone(), &history).await.unwrap()
}

async fn submit(host: &LocalHost, execution_id: &str, applicant: &str, payload: Value) {
    host.signal(
        execution_id,
        None,
        "submit",
        json!({"applicantId": applicant, "payload": payload}),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_full_onboarding_journey() {
    let calls: Calls = Arc::default();
    let host = host(&calls, None);
    let parent = start(&host, "A1").await;

    let signup = child_execution_id("signup", &parent.run_id);
    wait_running(&host, &signup).await;
    submit(&host, &signup, "A1", json!({"degree": "BSc"})).await;
    wait_for_current(&host, &signup, "watch_video").await;
    submit(&host, &signup, "A1", json!({"age": 61})).await;

    let state = wait_for_current(&host, &parent.execution_id, "lead").await;
    assert_eq!(state.steps[0].status, StepStatus::Completed);
    assert_eq!(state.steps[1].status, StepStatus::InProgress);
    assert_eq!(
        state.steps[0].child_execution_id.as_deref(),
        Some(signup.as_str())
    );

    let lead = child_execution_id("lead", &parent.run_id);
    wait_running(&host, &lead).await;
    submit(&host, &lead, "A1", json!({"overview": "seen"})).await;

    let application = child_execution_id("application", &parent.run_id);
    wait_running(&host, &application).await;
    submit(&host, &application, "A1", json!({"sop": "text"})).await;
    wait_for_current(&host, &application, "assessment").await;
    submit(&host, &application, "A1", json!({"score": 9})).await;

    for _ in 0..400 {
        if state_of(&host, &parent.execution_id).await.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        host.describe(&parent.execution_id).await.unwrap(),
        ExecutionStatus::Running
    );
    submit(&host, &parent.execution_id, "A1", json!("done")).await;

    let ExecutionOutcome::Completed(result) =
        host.await_outcome(&parent.execution_id).await.unwrap()
    else {
        panic!("onboarding did not complete");
    };
    assert_eq!(result["message"], "Applicant onboarding completed");
    assert_eq!(result["children"].as_array().unwrap().len(), 3);
    assert_eq!(result["acknowledgement"]["payload"], "done");

    let calls = calls.lock().clone();
    let order: Vec<&str> = calls.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        order,
        vec![
            "degree_details",
            "sync_profile",
            "watch_video",
            "sync_profile",
            "overview",
            "sync_profile",
            "statement_of_purpose",
            "sync_profile",
            "assessment",
            "sync_profile",
        ]
    );
    let synced_age: Vec<&Value> = calls
        .iter()
        .filter(|(n, input)| n == "sync_profile" && input["payload"]["age"] == 61)
        .map(|(_, input)| input)
        .collect();
    assert_eq!(synced_age.len(), 1);

    let replayed = replay_parent(&host, &parent).await;
    assert_eq!(replayed.state, state_of(&host, &parent.execution_id).await);
    assert_eq!(replayed.result.unwrap().unwrap(), result);
}

#[tokio::test]
async fn test_child_ids_unique_across_parents() {
    let calls: Calls = Arc::default();
    let host = host(&calls, None);
    let first = start(&host, "A1").await;
    let second = start(&host, "A2").await;

    let a = child_execution_id("signup", &first.run_id);
    let b = child_execution_id("signup", &second.run_id);
    assert_ne!(a, b);
    wait_running(&host, &a).await;
    wait_running(&host, &b).await;

    wait_for_current(&host, &a, "degree_details").await;
    let parent_state = state_of(&host, &first.execution_id).await;
    assert_eq!(parent_state.steps[0].child_execution_id.as_deref(), Some(a.as_str()));
}

#[tokio::test]
async fn test_child_failure_fails_parent() {
    let calls: Calls = Arc::default();
    let host = host(&calls, Some("overview"));
    let parent = start(&host, "A3").await;

    let signup = child_execution_id("signup", &parent.run_id);
    wait_running(&host, &signup).await;
    submit(&host, &signup, "A3", json!({})).await;
    wait_for_current(&host, &signup, "watch_video").await;
    submit(&host, &signup, "A3", json!({})).await;

    let outcome = host.await_outcome(&parent.execution_id).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed(_)));

    let lead = child_execution_id("lead", &parent.run_id);
    assert_eq!(host.describe(&lead).await.unwrap(), ExecutionStatus::Failed);

    let state = state_of(&host, &parent.execution_id).await;
    assert_eq!(state.current.action, "lead");
    assert_eq!(state.steps[1].status, StepStatus::InProgress);
    assert_eq!(state.steps[2].status, StepStatus::NotStarted);

    let application = child_execution_id("application", &parent.run_id);
    assert!(host.describe(&application).await.is_err());

    let replayed = replay_parent(&host, &parent).await;
    assert_eq!(replayed.state, state);
    let Some(Err(JourneyError::Child { execution_id, .. })) = replayed.result else {
        panic!("expected the recorded child failure");
    };
    assert_eq!(execution_id, lead);
}
