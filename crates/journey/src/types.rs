use serde::{Deserialize, Serialize};

use crate::error::JourneyError;

/// Progress of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// One stage of a journey as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub action: String,
    pub index: u32,
    pub status: StepStatus,
    #[serde(default)]
    pub child_execution_id: Option<String>,
}

impl WorkflowStep {
    pub fn new(action: impl Into<String>, index: u32) -> Self {
        Self {
            action: action.into(),
            index,
            status: StepStatus::NotStarted,
            child_execution_id: None,
        }
    }
}

/// Snapshot of a journey's progress.
///
/// Exactly one step is `IN_PROGRESS` until the last one completes, after
/// which none is. Transitions only ever move forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub current: WorkflowStep,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowState {
    /// Builds the starting state: first step in progress, the rest not
    /// started.
    pub fn new(mut steps: Vec<WorkflowStep>) -> Result<Self, JourneyError> {
        let first = steps
            .first_mut()
            .ok_or_else(|| JourneyError::InvalidDefinition("journey has no steps".into()))?;
        first.status = StepStatus::InProgress;
        let current = first.clone();
        for step in steps.iter_mut().skip(1) {
            step.status = StepStatus::NotStarted;
        }
        Ok(Self { current, steps })
    }

    pub fn in_progress_position(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::InProgress)
    }

    pub fn in_progress_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::InProgress)
            .count()
    }

    pub fn is_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Completed)
    }

    /// Completes the in-progress step and starts the next not-started one.
    /// Once the last step completes, `current` keeps the completed step.
    pub fn advance(&mut self) -> Result<(), JourneyError> {
        let pos = self.in_progress_position().ok_or_else(|| {
            JourneyError::InvalidTransition("no step is in progress".to_string())
        })?;
        self.steps[pos].status = StepStatus::Completed;

        match self.steps[pos + 1..]
            .iter_mut()
            .find(|s| s.status == StepStatus::NotStarted)
        {
            Some(next) => {
                next.status = StepStatus::InProgress;
                self.current = next.clone();
            }
            None => self.current = self.steps[pos].clone(),
        }
        Ok(())
    }

    /// Records the child execution driving the in-progress step.
    pub fn assign_child(&mut self, execution_id: impl Into<String>) -> Result<(), JourneyError> {
        let pos = self.in_progress_position().ok_or_else(|| {
            JourneyError::InvalidTransition("no step is in progress".to_string())
        })?;
        let execution_id = execution_id.into();
        self.steps[pos].child_execution_id = Some(execution_id);
        self.current = self.steps[pos].clone();
        Ok(())
    }
}

/// Input every onboarding journey is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyInput {
    pub applicant_id: String,
}

impl JourneyInput {
    pub fn new(applicant_id: impl Into<String>) -> Self {
        Self {
            applicant_id: applicant_id.into(),
        }
    }

    pub fn decode(raw: &serde_json::Value) -> Result<Self, JourneyError> {
        serde_json::from_value(raw.clone()).map_err(|e| JourneyError::InvalidInput(e.to_string()))
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "applicantId": self.applicant_id })
    }
}
