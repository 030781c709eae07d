use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use swarm_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use swarm_instruments::{BucketRecorder, OperationRecord};

use crate::event::{WorkerEvent, WorkerEventSender, WorkerId, WorkerMessage};
use crate::executor::Executor;
use crate::plan::{PayloadDataset, Variables};
use crate::types::now_ms;

/// The context of a whole run, created by [crate::run::run] and handed to the setup and teardown
/// hooks.
#[derive(Debug)]
pub struct RunnerContext {
    run_id: String,
    executor: Arc<Executor>,
    shutdown_handle: ShutdownHandle,
    variables: Variables,
}

impl RunnerContext {
    pub(crate) fn new(
        run_id: String,
        executor: Arc<Executor>,
        shutdown_handle: ShutdownHandle,
        variables: Variables,
    ) -> Self {
        Self {
            run_id,
            executor,
            shutdown_handle,
            variables,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// The shared context every worker receives when it starts running.
    ///
    /// This starts out as the variables from the test definition. The setup hook can add to it
    /// or change it and the result is sent to every worker identically.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    /// Stop the run early, as if the user had pressed Ctrl-C.
    pub fn force_stop_run(&self) {
        self.shutdown_handle.shutdown();
    }
}

/// Read-only state shared by every virtual user of one worker.
#[derive(Debug)]
pub(crate) struct VuShared {
    pub(crate) worker_id: WorkerId,
    pub(crate) worker: usize,
    pub(crate) total_workers: usize,
    pub(crate) variables: Variables,
    pub(crate) payload: Vec<PayloadDataset>,
    pub(crate) recorder: Arc<Mutex<BucketRecorder>>,
    pub(crate) events: WorkerEventSender,
}

/// What a virtual user's behaviour can see and do.
pub struct VuContext {
    vu_id: u64,
    shared: Arc<VuShared>,
    shutdown_listener: DelegatedShutdownListener,
}

impl VuContext {
    pub(crate) fn new(
        vu_id: u64,
        shared: Arc<VuShared>,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            vu_id,
            shared,
            shutdown_listener,
        }
    }

    /// Sequence number of this virtual user within its worker, starting from 0.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.shared.worker_id
    }

    /// 1-based index of the worker running this virtual user.
    pub fn worker(&self) -> usize {
        self.shared.worker
    }

    pub fn total_workers(&self) -> usize {
        self.shared.total_workers
    }

    pub fn variables(&self) -> &Variables {
        &self.shared.variables
    }

    pub fn var(&self, name: &str) -> Option<&serde_json::Value> {
        self.shared.variables.get(name)
    }

    /// A string variable, for the common case of a target address or similar.
    pub fn var_str(&self, name: &str) -> Option<&str> {
        self.var(name).and_then(|v| v.as_str())
    }

    /// The payload row for this virtual user, taken round-robin from this worker's share of the
    /// dataset.
    pub fn payload_row(&self, dataset: &str) -> Option<&[String]> {
        let dataset = self.shared.payload.iter().find(|d| d.name == dataset)?;
        if dataset.rows.is_empty() {
            return None;
        }

        let row = (self.vu_id % dataset.rows.len() as u64) as usize;
        Some(&dataset.rows[row])
    }

    pub fn incr(&self, name: &str, by: u64) {
        self.shared.recorder.lock().incr(name, by, now_ms());
    }

    pub fn record(&self, name: &str, value: u64) {
        self.shared.recorder.lock().record(name, value, now_ms());
    }

    /// Record a duration in milliseconds.
    pub fn record_duration(&self, name: &str, duration: Duration) {
        self.record(name, duration.as_millis() as u64);
    }

    /// Count an occurrence towards a per-second rate.
    pub fn mark(&self, name: &str) {
        self.shared.recorder.lock().mark(name, now_ms());
    }

    pub fn add_operation(&self, operation: &OperationRecord) {
        self.shared.recorder.lock().add_operation(operation, now_ms());
    }

    /// Send a line to the coordinator's log.
    pub fn log(&self, message: impl Into<String>) {
        self.send(WorkerEvent::Log(vec![message.into()]));
    }

    /// Ask for the run to exit with at least this code.
    pub fn suggest_exit_code(&self, code: i32) {
        self.send(WorkerEvent::SetSuggestedExitCode(code));
    }

    /// Listen for the worker being stopped, useful for long-running behaviours.
    pub fn shutdown_listener(&mut self) -> &mut DelegatedShutdownListener {
        &mut self.shutdown_listener
    }

    fn send(&self, event: WorkerEvent) {
        let message = WorkerMessage {
            worker_id: self.shared.worker_id.clone(),
            event,
        };
        if self.shared.events.send(message).is_err() {
            log::debug!("Coordinator is gone, dropping event from {}", self.shared.worker_id);
        }
    }
}
