use std::collections::BTreeMap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use swarm_core::prelude::ShutdownHandle;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::definition::VuBehaviour;
use crate::event::{WorkerEventSender, WorkerId};
use crate::plan::Variables;
use crate::platform::{PrepareRequest, WorkerCommand, WorkerPlatform};
use crate::types::SwarmResult;

mod schedule;
mod worker;

use worker::LocalWorker;

/// How long [LocalPlatform::shutdown] waits for all worker threads to exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct LocalWorkerHandle {
    commands: UnboundedSender<WorkerCommand>,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

/// Runs each worker on its own OS thread with its own async runtime.
///
/// Workers share nothing with the coordinator or each other, everything they need arrives in
/// commands and everything they produce leaves as events.
pub struct LocalPlatform {
    behaviour: VuBehaviour,
    desired_worker_count: usize,
    created: usize,
    workers: BTreeMap<WorkerId, LocalWorkerHandle>,
}

impl LocalPlatform {
    pub fn new(behaviour: VuBehaviour, desired_worker_count: usize) -> Self {
        Self {
            behaviour,
            desired_worker_count,
            created: 0,
            workers: BTreeMap::new(),
        }
    }

    fn send(&self, worker_id: &WorkerId, command: WorkerCommand) -> SwarmResult<()> {
        let handle = self
            .workers
            .get(worker_id)
            .with_context(|| format!("Unknown worker {worker_id}"))?;

        handle
            .commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("Worker {worker_id} is no longer accepting commands"))
    }
}

impl WorkerPlatform for LocalPlatform {
    fn create_worker(&mut self, events: WorkerEventSender) -> SwarmResult<WorkerId> {
        self.created += 1;
        let worker_id = WorkerId::new(format!("worker-{}", self.created));

        let (commands, command_receiver) = mpsc::unbounded_channel();
        let shutdown = ShutdownHandle::default();
        let worker = LocalWorker::new(
            worker_id.clone(),
            events,
            self.behaviour,
            shutdown.clone(),
        );

        let thread = std::thread::Builder::new()
            .name(worker_id.to_string())
            .spawn(move || worker.run(command_receiver))
            .with_context(|| format!("Failed to spawn thread for {worker_id}"))?;

        log::debug!("Created local worker {worker_id}");

        self.workers.insert(
            worker_id.clone(),
            LocalWorkerHandle {
                commands,
                shutdown,
                thread: Some(thread),
            },
        );

        Ok(worker_id)
    }

    fn prepare_worker(&mut self, worker_id: &WorkerId, request: PrepareRequest) -> SwarmResult<()> {
        self.send(worker_id, WorkerCommand::Prepare(Box::new(request)))
    }

    fn run_worker(&mut self, worker_id: &WorkerId, context: &Variables) -> SwarmResult<()> {
        self.send(worker_id, WorkerCommand::Run(context.clone()))
    }

    fn stop_worker(&mut self, worker_id: &WorkerId) -> SwarmResult<()> {
        let handle = self
            .workers
            .get(worker_id)
            .with_context(|| format!("Unknown worker {worker_id}"))?;

        handle.shutdown.shutdown();
        // A worker that has not started running is still waiting on its command channel.
        let _ = handle.commands.send(WorkerCommand::Stop);

        Ok(())
    }

    fn shutdown(&mut self) -> SwarmResult<()> {
        for handle in self.workers.values() {
            handle.shutdown.shutdown();
            let _ = handle.commands.send(WorkerCommand::Stop);
        }

        let deadline = Instant::now() + JOIN_TIMEOUT;
        for (worker_id, handle) in self.workers.iter_mut() {
            let Some(thread) = handle.thread.take() else {
                continue;
            };

            while !thread.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL_INTERVAL);
            }
            if !thread.is_finished() {
                log::warn!("Worker thread {worker_id} did not exit in time, leaving it behind");
                continue;
            }

            if thread.join().is_err() {
                log::error!("Worker thread {worker_id} panicked");
            }
        }

        Ok(())
    }

    fn desired_worker_count(&self) -> usize {
        self.desired_worker_count
    }
}
