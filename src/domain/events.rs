//! Progress events emitted during pipeline execution.
//!
//! Events are immutable, append-only records. Each run's events carry a
//! gapless, strictly increasing sequence number assigned by the run's
//! progress bus at publish time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single progress event within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The run this event belongs to
    pub run_id: Uuid,

    /// Type of event
    pub event_type: EventType,

    /// Step name (absent for run-level events)
    pub step_name: Option<String>,

    /// Incremental progress payload (only for `progress` events)
    pub progress: Option<ProgressUpdate>,

    /// Error description (only for `failed` events)
    pub error: Option<String>,

    /// Position of this event in the run's event stream, starting at 0
    pub sequence_number: u64,

    /// When this event was produced
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn new(run_id: Uuid, event_type: EventType, step_name: Option<String>) -> Self {
        Self {
            run_id,
            event_type,
            step_name,
            progress: None,
            error: None,
            sequence_number: 0,
            timestamp: Utc::now(),
        }
    }

    /// Run began executing
    pub fn started(run_id: Uuid) -> Self {
        Self::new(run_id, EventType::Started, None)
    }

    /// A step began executing
    pub fn step_started(run_id: Uuid, step_name: impl Into<String>) -> Self {
        Self::new(run_id, EventType::StepStarted, Some(step_name.into()))
    }

    /// Incremental progress reported from inside a step
    pub fn progress(run_id: Uuid, step_name: impl Into<String>, update: ProgressUpdate) -> Self {
        let mut event = Self::new(run_id, EventType::Progress, Some(step_name.into()));
        event.progress = Some(update);
        event
    }

    /// A step finished successfully
    pub fn step_completed(run_id: Uuid, step_name: impl Into<String>) -> Self {
        Self::new(run_id, EventType::StepCompleted, Some(step_name.into()))
    }

    /// Run finished with every step successful
    pub fn completed(run_id: Uuid) -> Self {
        Self::new(run_id, EventType::Completed, None)
    }

    /// Run stopped because a step failed
    pub fn failed(run_id: Uuid, step_name: impl Into<String>, error: impl Into<String>) -> Self {
        let mut event = Self::new(run_id, EventType::Failed, Some(step_name.into()));
        event.error = Some(error.into());
        event
    }

    /// Run stopped at a step boundary after a cancellation request
    pub fn cancelled(run_id: Uuid) -> Self {
        Self::new(run_id, EventType::Cancelled, None)
    }

    /// Whether this event ends the run's event stream
    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }
}

/// Types of events that can occur during pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The run began executing
    Started,

    /// A step began executing
    StepStarted,

    /// Incremental progress within the current step
    Progress,

    /// A step finished successfully
    StepCompleted,

    /// The run finished with every step successful
    Completed,

    /// The run stopped because a step failed
    Failed,

    /// The run stopped after a cancellation request
    Cancelled,
}

impl EventType {
    /// Terminal events end the stream; exactly one is emitted per run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress payload reported from inside a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Completion percentage, clamped to [0, 100] before publishing
    pub percentage: f64,

    /// Human-readable progress message
    pub message: String,
}

impl ProgressUpdate {
    /// Create an update with the percentage clamped to [0, 100]
    pub fn new(percentage: f64, message: impl Into<String>) -> Self {
        Self {
            percentage: percentage.clamp(0.0, 100.0),
            message: message.into(),
        }
    }
}
