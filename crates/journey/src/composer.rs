//! Parent journeys built from sequential child executions.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::context::{ChildOptions, WorkflowContext};
use crate::engine::Journey;
use crate::error::JourneyError;
use crate::signal::SignalGate;
use crate::tracker::StateTracker;
use crate::types::{JourneyInput, WorkflowState, WorkflowStep};

/// Child execution id for a sub-journey of the given parent run. Stable for
/// a run, unique across runs.
pub fn child_execution_id(journey: &str, parent_run_id: &str) -> String {
    format!("{journey}:{parent_run_id}")
}

/// One sub-journey in a composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildJourney {
    pub action: String,
    pub index: u32,
    pub journey: String,
}

impl ChildJourney {
    pub fn new(action: impl Into<String>, index: u32, journey: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            index,
            journey: journey.into(),
        }
    }
}

/// Runs child journeys one after another, failing fast, then waits for a
/// final acknowledgement signal.
#[derive(Debug, Clone)]
pub struct JourneyComposer {
    name: String,
    children: Vec<ChildJourney>,
    child_timeout: Duration,
    completion_channel: String,
    signal_timeout: Option<Duration>,
}

impl JourneyComposer {
    pub fn new(
        name: impl Into<String>,
        children: Vec<ChildJourney>,
        child_timeout: Duration,
        completion_channel: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            children,
            child_timeout,
            completion_channel: completion_channel.into(),
            signal_timeout: None,
        }
    }

    pub fn with_signal_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.signal_timeout = timeout;
        self
    }

    pub fn children(&self) -> &[ChildJourney] {
        &self.children
    }
}

#[async_trait]
impl Journey for JourneyComposer {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_state(&self) -> Result<WorkflowState, JourneyError> {
        WorkflowState::new(
            self.children
                .iter()
                .map(|c| WorkflowStep::new(c.action.clone(), c.index))
                .collect(),
        )
    }

    fn validate(&self) -> Result<(), JourneyError> {
        if self.children.is_empty() {
            return Err(JourneyError::InvalidDefinition(format!(
                "journey '{}' has no children",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for child in &self.children {
            if child.journey == self.name {
                return Err(JourneyError::InvalidDefinition(format!(
                    "journey '{}' cannot compose itself",
                    self.name
                )));
            }
            if !seen.insert(child.journey.as_str()) {
                return Err(JourneyError::InvalidDefinition(format!(
                    "journey '{}' composes '{}' twice",
                    self.name, child.journey
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, ctx: &dyn WorkflowContext, input: Value) -> Result<Value, JourneyError> {
        let applicant = JourneyInput::decode(&input)?;
        let mut state = self.initial_state()?;
        let tracker = StateTracker::register(ctx, &state);
        let replaying = ctx.is_replaying();
        let parent = ctx.identity().clone();

        if !replaying {
            info!(
                journey = %self.name,
                execution_id = %parent.execution_id,
                applicant_id = %applicant.applicant_id,
                "Onboarding workflow started"
            );
        }

        let mut results = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let execution_id = child_execution_id(&child.journey, &parent.run_id);
            state.assign_child(execution_id.clone())?;
            tracker.publish(&state);

            let options = ChildOptions {
                execution_id: execution_id.clone(),
                execution_timeout: self.child_timeout,
            };
            match ctx.execute_child(&child.journey, options, input.clone()).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    if !replaying {
                        error!(
                            journey = %self.name,
                            child_execution_id = %execution_id,
                            error = %err,
                            "Parent execution received child execution failure"
                        );
                    }
                    return Err(err);
                }
            }

            state.advance()?;
            tracker.publish(&state);
        }

        let gate = SignalGate::new(ctx, self.signal_timeout);
        let acknowledgement = gate.await_signal(&self.completion_channel).await?;

        if !replaying {
            info!(
                journey = %self.name,
                execution_id = %parent.execution_id,
                "Onboarding workflow completed"
            );
        }
        Ok(json!({
            "message": "Applicant onboarding completed",
            "children": results,
            "acknowledgement": acknowledgement,
        }))
    }
}
