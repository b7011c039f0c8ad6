//! Step registry and the step capability boundary.
//!
//! Steps are black boxes to the engine: each is registered under a unique
//! name and invoked with the run's argument mapping plus a progress
//! reporter. Pipelines are resolved against the registry synchronously at
//! submission, so a run is never created with an unknown step name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::bus::ProgressReporter;
use crate::domain::StepArgs;

/// An executable step capability.
///
/// Implementations may block on external I/O (parsing, database writes).
/// They report incremental progress through the reporter and fail with a
/// domain-specific description. Side effects of partially completed work
/// are the implementation's responsibility; the engine never rolls back.
#[async_trait]
pub trait StepCapability: Send + Sync {
    /// Execute the step with the run's arguments
    async fn execute(&self, args: &StepArgs, progress: &ProgressReporter) -> Result<(), StepError>;
}

/// A step name paired with its resolved capability
pub type ResolvedStep = (String, Arc<dyn StepCapability>);

/// Failure of a single step execution
#[derive(Debug, Error)]
pub enum StepError {
    /// The capability reported a domain error
    #[error("{0}")]
    Failed(String),

    /// The configured per-step deadline elapsed before the capability returned
    #[error("step timed out after {0:?}")]
    DeadlineExceeded(Duration),
}

impl StepError {
    /// Create a failure from a domain error description
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Attempt to register a step name twice
#[derive(Debug, Clone, Error)]
#[error("step '{name}' is already registered")]
pub struct DuplicateStep {
    pub name: String,
}

/// A pipeline referenced a step name that was never registered
#[derive(Debug, Clone, Error)]
#[error("unknown step '{name}'")]
pub struct UnknownStep {
    pub name: String,
}

/// Registry of all available pipeline steps.
///
/// Built once at process start, then shared immutably (behind an `Arc`)
/// with the submission path and the runner factory.
#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn StepCapability>>,
}

impl StepRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step capability under a unique name
    pub fn register<C>(&mut self, name: impl Into<String>, capability: C) -> Result<(), DuplicateStep>
    where
        C: StepCapability + 'static,
    {
        let name = name.into();
        if self.steps.contains_key(&name) {
            return Err(DuplicateStep { name });
        }

        self.steps.insert(name, Arc::new(capability));
        Ok(())
    }

    /// Resolve an ordered list of step names to their capabilities.
    ///
    /// Fails on the first unrecognized name.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ResolvedStep>, UnknownStep> {
        names
            .iter()
            .map(|name| {
                self.steps
                    .get(name)
                    .map(|capability| (name.clone(), capability.clone()))
                    .ok_or_else(|| UnknownStep { name: name.clone() })
            })
            .collect()
    }

    /// Check whether a step name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// List all registered step names, sorted
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.keys().cloned().collect();
        names.sort();
        names
    }
}
