use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use onboarding_core::SignalPayload;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::activity::ActivityOptions;
use crate::context::WorkflowContext;
use crate::engine::Journey;
use crate::error::JourneyError;
use crate::signal::SignalGate;
use crate::tracker::StateTracker;
use crate::types::{JourneyInput, WorkflowState, WorkflowStep};

/// Declaration of one stage: an activity, optionally followed by a signal
/// wait and a side effect fed with the signal payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub action: String,
    pub index: u32,
    pub activity: String,
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub post_signal: Option<String>,
}

impl StageSpec {
    pub fn new(action: impl Into<String>, index: u32, activity: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            index,
            activity: activity.into(),
            signal: None,
            post_signal: None,
        }
    }

    pub fn with_signal(mut self, channel: impl Into<String>) -> Self {
        self.signal = Some(channel.into());
        self
    }

    pub fn with_post_signal(mut self, activity: impl Into<String>) -> Self {
        self.post_signal = Some(activity.into());
        self
    }
}

/// Runs an ordered list of stages for one journey instance.
///
/// Any activity or post-signal failure aborts the whole run and leaves the
/// failing stage `IN_PROGRESS` in the published state.
#[derive(Debug, Clone)]
pub struct StageMachine {
    name: String,
    stages: Vec<StageSpec>,
    activity_options: ActivityOptions,
    signal_timeout: Option<Duration>,
}

impl StageMachine {
    pub fn new(
        name: impl Into<String>,
        stages: Vec<StageSpec>,
        activity_options: ActivityOptions,
    ) -> Self {
        Self {
            name: name.into(),
            stages,
            activity_options,
            signal_timeout: None,
        }
    }

    pub fn with_signal_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.signal_timeout = timeout;
        self
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    async fn run_stage(
        &self,
        ctx: &dyn WorkflowContext,
        gate: &SignalGate<'_>,
        input: &JourneyInput,
        stage: &StageSpec,
        latest: &mut Option<SignalPayload>,
    ) -> Result<(), JourneyError> {
        let activity_input = json!({
            "applicantId": input.applicant_id,
            "action": stage.action,
        });
        ctx.execute_activity(&stage.activity, activity_input, &self.activity_options)
            .await?;

        let Some(channel) = &stage.signal else {
            return Ok(());
        };
        let signal = gate.await_signal(channel).await?;

        if let Some(effect) = &stage.post_signal {
            let effect_input = json!({
                "applicantId": signal.applicant_id,
                "action": stage.action,
                "payload": signal.payload,
            });
            ctx.execute_activity(effect, effect_input, &self.activity_options)
                .await
                .map_err(|err| match err {
                    JourneyError::Activity { activity, source } => {
                        JourneyError::PostSignal { activity, source }
                    }
                    other => other,
                })?;
        }
        *latest = Some(signal);
        Ok(())
    }
}

#[async_trait]
impl Journey for StageMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_state(&self) -> Result<WorkflowState, JourneyError> {
        WorkflowState::new(
            self.stages
                .iter()
                .map(|s| WorkflowStep::new(s.action.clone(), s.index))
                .collect(),
        )
    }

    fn validate(&self) -> Result<(), JourneyError> {
        if self.stages.is_empty() {
            return Err(JourneyError::InvalidDefinition(format!(
                "journey '{}' has no stages",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.action.as_str()) {
                return Err(JourneyError::InvalidDefinition(format!(
                    "journey '{}' declares stage '{}' twice",
                    self.name, stage.action
                )));
            }
            if stage.post_signal.is_some() && stage.signal.is_none() {
                return Err(JourneyError::InvalidDefinition(format!(
                    "stage '{}' has a post-signal side effect but no signal",
                    stage.action
                )));
            }
        }
        Ok(())
    }

    async fn run(&self, ctx: &dyn WorkflowContext, input: Value) -> Result<Value, JourneyError> {
        let input = JourneyInput::decode(&input)?;
        let mut state = self.initial_state()?;
        let tracker = StateTracker::register(ctx, &state);
        let gate = SignalGate::new(ctx, self.signal_timeout);
        let replaying = ctx.is_replaying();
        let execution_id = ctx.identity().execution_id.clone();

        if !replaying {
            info!(
                journey = %self.name,
                execution_id = %execution_id,
                applicant_id = %input.applicant_id,
                "Journey started"
            );
        }

        let mut latest: Option<SignalPayload> = None;
        for stage in &self.stages {
            if let Err(err) = self
                .run_stage(ctx, &gate, &input, stage, &mut latest)
                .await
            {
                if !replaying {
                    error!(
                        journey = %self.name,
                        execution_id = %execution_id,
                        stage = %stage.action,
                        error = %err,
                        "Stage failed, aborting journey"
                    );
                }
                return Err(err);
            }

            state.advance()?;
            tracker.publish(&state);

            if !replaying {
                info!(
                    journey = %self.name,
                    execution_id = %execution_id,
                    stage = %stage.action,
                    next = %state.current.action,
                    "Stage completed"
                );
            }
        }

        if !replaying {
            info!(journey = %self.name, execution_id = %execution_id, "Journey completed");
        }
        Ok(json!({
            "message": format!("{} journey completed", self.name),
            "lastPayload": latest,
        }))
    }
}
