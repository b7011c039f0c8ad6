//! Per-run execution state machine.
//!
//! One runner task exists per run, spawned at submission and decoupled
//! from the submitting caller. The runner owns every lifecycle transition
//! of its run record: `Pending → Running → {Completed, Failed, Cancelled}`.
//! Cancellation is cooperative and only observed at step boundaries; an
//! in-flight step is never preempted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::core::bus::{ProgressBus, ProgressReporter};
use crate::core::registry::{ResolvedStep, StepCapability, StepError};
use crate::domain::{PipelineRun, ProgressEvent, StepArgs};

/// Shared state for one run: the record, cancellation flag, bus, and
/// completion signal. Held by the run directory and by the runner task.
pub(crate) struct RunHandle {
    pub run_id: Uuid,
    pub run: RwLock<PipelineRun>,
    pub bus: Arc<ProgressBus>,
    cancelled: AtomicBool,
    completion: watch::Sender<bool>,
}

impl RunHandle {
    /// Wrap a freshly created run; returns the handle and the receiver
    /// half of its completion signal.
    pub fn new(run: PipelineRun, bus: Arc<ProgressBus>) -> (Arc<Self>, watch::Receiver<bool>) {
        let (completion, completed) = watch::channel(false);
        let handle = Arc::new(Self {
            run_id: run.id,
            run: RwLock::new(run),
            bus,
            cancelled: AtomicBool::new(false),
            completion,
        });
        (handle, completed)
    }

    /// Set the advisory cancellation flag; takes effect at the next step
    /// boundary.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Executes one run's steps in order, publishing lifecycle and progress
/// events to the run's bus.
pub(crate) struct PipelineRunner {
    handle: Arc<RunHandle>,
    steps: Vec<ResolvedStep>,
    step_deadline: Option<Duration>,
}

impl PipelineRunner {
    pub fn new(
        handle: Arc<RunHandle>,
        steps: Vec<ResolvedStep>,
        step_deadline: Option<Duration>,
    ) -> Self {
        Self {
            handle,
            steps,
            step_deadline,
        }
    }

    /// Drive the run to a terminal state.
    #[instrument(skip(self), fields(run_id = %self.handle.run_id))]
    pub async fn run(self) {
        let run_id = self.handle.run_id;
        let total = self.steps.len();

        let args = {
            let mut run = self.handle.run.write().await;
            run.mark_running();
            run.args.clone()
        };
        self.handle.bus.publish(ProgressEvent::started(run_id)).await;
        info!(steps = total, "Run started");

        let mut cancelled = false;
        let mut failed = false;

        for (index, (step_name, capability)) in self.steps.iter().enumerate() {
            if self.handle.cancel_requested() {
                cancelled = true;
                break;
            }

            info!(step = %step_name, "Step {}/{} started", index + 1, total);
            self.handle
                .bus
                .publish(ProgressEvent::step_started(run_id, step_name.as_str()))
                .await;

            let reporter = ProgressReporter::new(
                Arc::clone(&self.handle.bus),
                run_id,
                step_name.clone(),
            );

            match self.invoke(capability.as_ref(), &args, &reporter).await {
                Ok(()) => {
                    {
                        let mut run = self.handle.run.write().await;
                        run.current_step_index = index + 1;
                    }
                    self.handle
                        .bus
                        .publish(ProgressEvent::step_completed(run_id, step_name.as_str()))
                        .await;
                    info!(step = %step_name, "Step completed");
                }
                Err(e) => {
                    let message = e.to_string();
                    {
                        let mut run = self.handle.run.write().await;
                        run.mark_failed(step_name.as_str(), message.as_str());
                    }
                    self.handle
                        .bus
                        .publish(ProgressEvent::failed(
                            run_id,
                            step_name.as_str(),
                            message.as_str(),
                        ))
                        .await;
                    error!(step = %step_name, error = %message, "Step failed, run aborted");
                    failed = true;
                    break;
                }
            }
        }

        if cancelled {
            {
                let mut run = self.handle.run.write().await;
                run.mark_cancelled();
            }
            self.handle.bus.publish(ProgressEvent::cancelled(run_id)).await;
            info!("Run cancelled");
        } else if !failed {
            {
                let mut run = self.handle.run.write().await;
                run.mark_completed();
            }
            self.handle.bus.publish(ProgressEvent::completed(run_id)).await;
            info!("Run completed");
        }

        let _ = self.handle.completion.send(true);
    }

    /// Invoke a step capability, applying the configured deadline if any.
    async fn invoke(
        &self,
        capability: &dyn StepCapability,
        args: &StepArgs,
        reporter: &ProgressReporter,
    ) -> Result<(), StepError> {
        match self.step_deadline {
            Some(deadline) => timeout(deadline, capability.execute(args, reporter))
                .await
                .map_err(|_| StepError::DeadlineExceeded(deadline))?,
            None => capability.execute(args, reporter).await,
        }
    }
}
