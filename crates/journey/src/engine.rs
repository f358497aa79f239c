use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use crate::context::WorkflowContext;
use crate::error::JourneyError;
use crate::types::WorkflowState;

/// A journey definition a host can start by name.
#[async_trait]
pub trait Journey: Send + Sync {
    fn name(&self) -> &str;

    /// State published before the first suspension point.
    fn initial_state(&self) -> Result<WorkflowState, JourneyError>;

    /// Structural checks run once at registration.
    fn validate(&self) -> Result<(), JourneyError> {
        self.initial_state().map(|_| ())
    }

    async fn run(&self, ctx: &dyn WorkflowContext, input: Value) -> Result<Value, JourneyError>;
}

/// Registered journey definitions, keyed by name.
#[derive(Clone, Default)]
pub struct JourneyRegistry {
    journeys: Arc<DashMap<String, Arc<dyn Journey>>>,
}

impl std::fmt::Debug for JourneyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyRegistry")
            .field("journeys", &self.names())
            .finish()
    }
}

impl JourneyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a journey, replacing any previous definition with
    /// the same name.
    pub fn register(&self, journey: Arc<dyn Journey>) -> Result<(), JourneyError> {
        journey.validate()?;
        let name = journey.name().to_string();
        info!(journey = %name, "Registering journey");
        self.journeys.insert(name, journey);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Journey>> {
        self.journeys.get(name).map(|r| r.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.journeys.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.journeys.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}
