//! Run state and lifecycle.
//!
//! A PipelineRun represents a single execution of a pipeline. While the run
//! is active its record is mutated exclusively by the runner task; once a
//! terminal status is reached the record never changes again.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Argument mapping passed to every step of a run.
///
/// Values are opaque to the engine; each step selects what it needs.
pub type StepArgs = HashMap<String, serde_json::Value>;

/// A single pipeline execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier, generated at submission, never reused
    pub id: Uuid,

    /// Ordered step names, validated at submission, immutable thereafter
    pub steps: Vec<String>,

    /// Arguments passed to every step
    pub args: StepArgs,

    /// Current lifecycle status
    pub status: RunStatus,

    /// Index of the next step to execute; advances monotonically and
    /// never exceeds `steps.len()`
    pub current_step_index: usize,

    /// When the runner began executing
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Failure details, set only when `status` is `Failed`
    pub error: Option<RunError>,
}

impl PipelineRun {
    /// Create a new run in `Pending` with a fresh identifier
    pub fn new(steps: Vec<String>, args: StepArgs) -> Self {
        Self {
            id: Uuid::new_v4(),
            steps,
            args,
            status: RunStatus::Pending,
            current_step_index: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Mark the run as running
    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the run as completed successfully
    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run as failed at the given step
    pub fn mark_failed(&mut self, step: impl Into<String>, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(RunError {
            step: step.into(),
            message: message.into(),
        });
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run as cancelled
    pub fn mark_cancelled(&mut self) {
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Check if the run has reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Submitted, runner task not yet started
    Pending,

    /// Currently executing
    Running,

    /// All steps finished successfully
    Completed,

    /// A step failed; remaining steps were skipped
    Failed,

    /// Stopped at a step boundary after a cancellation request
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Failure details for a run that ended in `Failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    /// Name of the step that failed
    pub step: String,

    /// Failure description from the step capability
    pub message: String,
}
