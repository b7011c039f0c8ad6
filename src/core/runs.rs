//! Concurrency-safe directory of in-flight and recently finished runs.
//!
//! Submission validates the step list, records the run, and spawns its
//! runner task; the caller gets the run id back immediately and never
//! blocks on execution. Finished runs (and their buses) are retained for
//! a configurable window so late clients can query and replay, then
//! evicted by the sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::bus::{EventSubscription, ProgressBus};
use crate::core::registry::{StepRegistry, UnknownStep};
use crate::core::runner::{PipelineRunner, RunHandle};
use crate::domain::{PipelineRun, PipelineSpec, RunStatus, StepArgs};

/// Submission rejected before any run was created
#[derive(Debug, Error)]
pub enum SubmitError {
    /// A step name is not present in the step registry
    #[error(transparent)]
    UnknownStep(#[from] UnknownStep),

    /// The step list was empty
    #[error("pipeline contains no steps")]
    EmptyPipeline,
}

/// The requested run id is unknown or already evicted
#[derive(Debug, Clone, Error)]
#[error("run {0} not found")]
pub struct RunNotFound(pub Uuid);

struct RunEntry {
    handle: Arc<RunHandle>,
    completed: watch::Receiver<bool>,
}

/// Directory of runs, keyed by run id
pub struct RunRegistry {
    steps: Arc<StepRegistry>,
    config: EngineConfig,
    runs: RwLock<HashMap<Uuid, RunEntry>>,
}

impl RunRegistry {
    /// Create a registry backed by the given step registry
    pub fn new(steps: Arc<StepRegistry>, config: EngineConfig) -> Self {
        Self {
            steps,
            config,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Submit a pipeline for execution.
    ///
    /// The step list is validated synchronously; on success the run record
    /// exists in `Pending` and a runner task has been spawned. Returns the
    /// run id without waiting for execution.
    pub async fn create(&self, steps: Vec<String>, args: StepArgs) -> Result<Uuid, SubmitError> {
        if steps.is_empty() {
            return Err(SubmitError::EmptyPipeline);
        }
        let resolved = self.steps.resolve(&steps)?;

        let run = PipelineRun::new(steps, args);
        let run_id = run.id;
        let bus = Arc::new(ProgressBus::new(run_id, self.config.event_buffer_capacity));
        let (handle, completed) = RunHandle::new(run, bus);

        {
            let mut runs = self.runs.write().await;
            runs.insert(
                run_id,
                RunEntry {
                    handle: Arc::clone(&handle),
                    completed,
                },
            );
        }

        let runner = PipelineRunner::new(handle, resolved, self.config.step_deadline());
        tokio::spawn(runner.run());

        info!(%run_id, "Run submitted");
        Ok(run_id)
    }

    /// Submit a pipeline from a spec document
    pub async fn create_from_spec(&self, spec: PipelineSpec) -> Result<Uuid, SubmitError> {
        self.create(spec.steps, spec.args).await
    }

    /// Current snapshot of a run
    pub async fn get(&self, run_id: Uuid) -> Result<PipelineRun, RunNotFound> {
        let runs = self.runs.read().await;
        let entry = runs.get(&run_id).ok_or(RunNotFound(run_id))?;
        let run = entry.handle.run.read().await;
        Ok(run.clone())
    }

    /// Request cancellation of a run.
    ///
    /// Advisory: the flag is observed at the runner's next step boundary.
    /// Succeeds whenever the run exists, regardless of whether the run
    /// finishes naturally first.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), RunNotFound> {
        let runs = self.runs.read().await;
        let entry = runs.get(&run_id).ok_or(RunNotFound(run_id))?;
        entry.handle.request_cancel();
        info!(%run_id, "Cancellation requested");
        Ok(())
    }

    /// Snapshots of known runs, optionally filtered by status, most
    /// recently started first
    pub async fn list(&self, filter: Option<RunStatus>) -> Vec<PipelineRun> {
        let runs = self.runs.read().await;
        let mut snapshots = Vec::with_capacity(runs.len());

        for entry in runs.values() {
            let run = entry.handle.run.read().await;
            if filter.map_or(true, |status| run.status == status) {
                snapshots.push(run.clone());
            }
        }

        snapshots.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        snapshots
    }

    /// Subscribe to a run's event stream
    pub async fn subscribe(&self, run_id: Uuid) -> Result<EventSubscription, RunNotFound> {
        let runs = self.runs.read().await;
        let entry = runs.get(&run_id).ok_or(RunNotFound(run_id))?;
        Ok(Arc::clone(&entry.handle.bus).subscribe())
    }

    /// Wait until a run reaches a terminal status
    pub async fn wait(&self, run_id: Uuid) -> Result<(), RunNotFound> {
        let mut completed = {
            let runs = self.runs.read().await;
            runs.get(&run_id)
                .ok_or(RunNotFound(run_id))?
                .completed
                .clone()
        };

        // A closed channel means the runner task is gone, i.e. finished
        let _ = completed.wait_for(|done| *done).await;
        Ok(())
    }

    /// Evict terminal runs whose retention window has expired.
    ///
    /// Active runs are never touched. Returns the number of evicted runs.
    pub async fn sweep(&self) -> usize {
        let retention = self.config.retention();
        let now = Utc::now();

        let mut runs = self.runs.write().await;
        let mut expired = Vec::new();

        for (id, entry) in runs.iter() {
            let run = entry.handle.run.read().await;
            if !run.status.is_terminal() {
                continue;
            }
            if let Some(finished_at) = run.finished_at {
                let age = now
                    .signed_duration_since(finished_at)
                    .to_std()
                    .unwrap_or_default();
                if age >= retention {
                    expired.push(*id);
                }
            }
        }

        for id in &expired {
            runs.remove(id);
        }

        if !expired.is_empty() {
            info!(evicted = expired.len(), "Swept expired runs");
        }
        expired.len()
    }

    /// Run `sweep` on a fixed interval in a background task
    pub fn spawn_sweeper(registry: Arc<RunRegistry>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }
}
