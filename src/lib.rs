//! sluice - Async data pipeline engine with live progress streaming
//!
//! Runs user-defined pipelines (ordered sequences of named steps) as
//! independent tokio tasks and fans ordered progress events out to any
//! number of subscribers per run, including clients that attach after the
//! run has started.
//!
//! # Architecture
//!
//! - Steps are registered once at startup in a [`StepRegistry`]; pipelines
//!   are validated against it at submission, before any run exists
//! - Each run owns a [`core::ProgressBus`]: an ordered, bounded replay
//!   buffer that late subscribers catch up from
//! - The runner task drives `Pending → Running → {Completed, Failed,
//!   Cancelled}` and is the only writer of run state
//! - [`RunRegistry`] is the concurrency-safe directory of runs, with
//!   advisory cancellation and time-based eviction of finished runs
//! - [`SubscriptionManager`] bridges bus subscriptions to transport-owned
//!   [`Connection`]s, dropping slow or dead connections without ever
//!   stalling a run
//!
//! # Modules
//!
//! - `config`: Engine tunables (buffer capacity, retention, timeouts)
//! - `core`: Orchestration logic (registry, bus, runner, runs, subscriptions)
//! - `domain`: Data structures (ProgressEvent, PipelineRun, PipelineSpec)

pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::EngineConfig;
pub use core::{
    Connection, DeliveryError, DuplicateStep, EventSubscription, ProgressReporter, RunNotFound,
    RunRegistry, StepCapability, StepError, StepRegistry, SubmitError, SubscriptionId,
    SubscriptionManager, UnknownStep,
};
pub use domain::{
    EventType, PipelineRun, PipelineSpec, ProgressEvent, ProgressUpdate, RunError, RunStatus,
    StepArgs,
};
