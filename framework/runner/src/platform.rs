use std::time::Duration;

use crate::event::{WorkerEventSender, WorkerId};
use crate::plan::{Variables, WorkerPlan};
use crate::types::SwarmResult;

mod local;

pub use local::LocalPlatform;

/// Settings every worker receives along with its plan.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOptions {
    /// Length of a metrics period.
    pub period: Duration,
    /// How long to wait for in-flight virtual users once the last phase ends.
    pub drain_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub plan: WorkerPlan,
    pub options: WorkerOptions,
}

/// Commands sent from the coordinator to a worker.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    Prepare(Box<PrepareRequest>),
    Run(Variables),
    Stop,
}

/// The place workers run.
///
/// A platform creates execution units and forwards commands to them. Workers report back by
/// sending [crate::event::WorkerMessage]s on the channel handed to [WorkerPlatform::create_worker],
/// starting with [crate::event::WorkerEvent::Online] once they are ready for a plan.
pub trait WorkerPlatform: Send {
    /// Start a new worker. Failing to create one aborts the run.
    fn create_worker(&mut self, events: WorkerEventSender) -> SwarmResult<WorkerId>;

    /// Hand a worker its plan. The worker answers with `ReadyWaiting`.
    fn prepare_worker(&mut self, worker_id: &WorkerId, request: PrepareRequest)
        -> SwarmResult<()>;

    /// Start the load. Every worker receives the same shared context.
    fn run_worker(&mut self, worker_id: &WorkerId, context: &Variables) -> SwarmResult<()>;

    /// Ask a worker to stop early. It should still send its final report.
    fn stop_worker(&mut self, worker_id: &WorkerId) -> SwarmResult<()>;

    /// Release everything the platform holds. Called once at the end of a run.
    fn shutdown(&mut self) -> SwarmResult<()>;

    /// How many workers the coordinator should expect to hear from.
    fn desired_worker_count(&self) -> usize;
}
