use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use swarm_core::prelude::{ShutdownHandle, ShutdownSignalError};
use swarm_instruments::{BucketRecorder, MetricBucket};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::context::{VuContext, VuShared};
use crate::definition::VuBehaviour;
use crate::event::{PhaseEvent, WorkerError, WorkerEvent, WorkerEventSender, WorkerId, WorkerMessage};
use crate::phase::WorkerPhase;
use crate::plan::Variables;
use crate::platform::{PrepareRequest, WorkerCommand};
use crate::types::now_ms;

use super::schedule::ArrivalSchedule;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Decrements the active count when a virtual user finishes, even if its behaviour panics.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(super) struct LocalWorker {
    id: WorkerId,
    events: WorkerEventSender,
    behaviour: VuBehaviour,
    shutdown: ShutdownHandle,
}

impl LocalWorker {
    pub(super) fn new(
        id: WorkerId,
        events: WorkerEventSender,
        behaviour: VuBehaviour,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            id,
            events,
            behaviour,
            shutdown,
        }
    }

    /// The body of the worker thread.
    pub(super) fn run(self, mut commands: UnboundedReceiver<WorkerCommand>) {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.emit(WorkerEvent::WorkerError(WorkerError::crash(format!(
                    "Failed to start worker runtime: {e}"
                ))));
                return;
            }
        };

        self.emit(WorkerEvent::Online);

        let request = loop {
            match commands.blocking_recv() {
                Some(WorkerCommand::Prepare(request)) => break request,
                Some(WorkerCommand::Run(_)) => {
                    log::warn!("Worker {} asked to run before it was prepared", self.id);
                }
                Some(WorkerCommand::Stop) | None => {
                    self.exit_early();
                    return;
                }
            }
        };

        log::debug!(
            "Worker {} prepared with {} phases",
            self.id,
            request.plan.phases.len()
        );
        self.emit(WorkerEvent::ReadyWaiting);

        let context = loop {
            match commands.blocking_recv() {
                Some(WorkerCommand::Run(context)) => break context,
                Some(WorkerCommand::Prepare(_)) => {
                    log::warn!("Worker {} was prepared twice, keeping the first plan", self.id);
                }
                Some(WorkerCommand::Stop) | None => {
                    self.exit_early();
                    return;
                }
            }
        };

        runtime.block_on(self.execute(*request, context));

        // Virtual users still running after the drain are abandoned, dropping the runtime would
        // wait for them.
        runtime.shutdown_background();
    }

    async fn execute(&self, request: PrepareRequest, context: Variables) {
        let PrepareRequest { plan, options } = request;

        self.emit(WorkerEvent::Running);

        let recorder = Arc::new(Mutex::new(BucketRecorder::new(options.period)));
        let shared = Arc::new(VuShared {
            worker_id: self.id.clone(),
            worker: plan.worker,
            total_workers: plan.total_workers,
            variables: merge_variables(plan.variables, context),
            payload: plan.payload,
            recorder: recorder.clone(),
            events: self.events.clone(),
        });

        let stats_reporter = tokio::spawn({
            let recorder = recorder.clone();
            let events = self.events.clone();
            let worker_id = self.id.clone();
            let period = options.period;
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let completed = recorder.lock().take_completed(now_ms());
                    for bucket in completed {
                        let message = WorkerMessage {
                            worker_id: worker_id.clone(),
                            event: WorkerEvent::Stats(bucket),
                        };
                        if events.send(message).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let active = Arc::new(AtomicUsize::new(0));
        let next_vu_id = Arc::new(AtomicU64::new(0));

        for phase in &plan.phases {
            if let Err(e) = self.run_phase(phase, &shared, &active, &next_vu_id).await {
                log::debug!("Worker {} stopping early: {e}", self.id);
                break;
            }
        }

        self.drain(&active, options.drain_timeout).await;
        stats_reporter.abort();

        let (periods, total) = {
            let mut recorder = recorder.lock();
            (recorder.take_all(), recorder.finish())
        };
        for bucket in periods {
            self.emit(WorkerEvent::Stats(bucket));
        }
        self.emit(WorkerEvent::Done(total));
    }

    async fn run_phase(
        &self,
        phase: &WorkerPhase,
        shared: &Arc<VuShared>,
        active: &Arc<AtomicUsize>,
        next_vu_id: &Arc<AtomicU64>,
    ) -> Result<(), ShutdownSignalError> {
        let mut shutdown_listener = self.shutdown.new_listener();
        let started = Instant::now();

        self.emit(WorkerEvent::PhaseStarted(PhaseEvent {
            index: phase.index,
            id: phase.id.clone(),
            name: phase.name.clone(),
            started_at: now_ms(),
            ended_at: None,
            definition: None,
        }));

        let max_vusers = phase.shape.max_vusers();
        for offset in ArrivalSchedule::new(&phase.shape, phase.duration_s) {
            tokio::select! {
                _ = tokio::time::sleep_until(started + offset) => {}
                _ = shutdown_listener.wait_for_shutdown() => return Err(ShutdownSignalError::default()),
            }

            if let Some(max) = max_vusers {
                if active.load(Ordering::SeqCst) as u64 >= max {
                    shared.recorder.lock().incr("vusers.skipped", 1, now_ms());
                    continue;
                }
            }

            self.spawn_vu(shared, active, next_vu_id.fetch_add(1, Ordering::SeqCst));
        }

        tokio::select! {
            _ = tokio::time::sleep_until(started + phase.duration()) => {}
            _ = shutdown_listener.wait_for_shutdown() => return Err(ShutdownSignalError::default()),
        }

        self.emit(WorkerEvent::PhaseCompleted(PhaseEvent {
            index: phase.index,
            id: phase.id.clone(),
            name: phase.name.clone(),
            started_at: now_ms().saturating_sub(started.elapsed().as_millis() as u64),
            ended_at: Some(now_ms()),
            definition: None,
        }));

        Ok(())
    }

    fn spawn_vu(&self, shared: &Arc<VuShared>, active: &Arc<AtomicUsize>, vu_id: u64) {
        active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(active.clone());
        let shared = shared.clone();
        let behaviour = self.behaviour;
        let shutdown_listener = self.shutdown.new_listener();

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let started = Instant::now();
            shared.recorder.lock().incr("vusers.created", 1, now_ms());

            let mut context = VuContext::new(vu_id, shared.clone(), shutdown_listener);
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| behaviour(&mut context)));

            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) if e.is::<ShutdownSignalError>() => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("Virtual user behaviour panicked".to_string()),
            };

            // Take the time under the lock so the stats reporter never sees a period reopen.
            let mut recorder = shared.recorder.lock();
            let at = now_ms();
            recorder.record(
                "vusers.session_length_ms",
                started.elapsed().as_millis() as u64,
                at,
            );
            match error {
                None => recorder.incr("vusers.completed", 1, at),
                Some(message) => {
                    recorder.incr("vusers.failed", 1, at);
                    recorder.incr(&format!("errors.{message}"), 1, at);
                    drop(recorder);

                    let _ = shared.events.send(WorkerMessage {
                        worker_id: shared.worker_id.clone(),
                        event: WorkerEvent::WorkerError(WorkerError::warn(message)),
                    });
                }
            }
        });
    }

    /// Wait, up to `timeout`, for in-flight virtual users to finish.
    async fn drain(&self, active: &AtomicUsize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while active.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                log::warn!(
                    "Worker {} gave up waiting for {} virtual users to finish",
                    self.id,
                    active.load(Ordering::SeqCst)
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Stopped before running any load, report an empty final bucket so the coordinator counts the exit.
    fn exit_early(&self) {
        log::debug!("Worker {} stopped before running", self.id);
        self.emit(WorkerEvent::Done(MetricBucket::new(now_ms(), 0)));
    }

    fn emit(&self, event: WorkerEvent) {
        let message = WorkerMessage {
            worker_id: self.id.clone(),
            event,
        };
        if self.events.send(message).is_err() {
            log::debug!("Coordinator is gone, worker {} dropping event", self.id);
        }
    }
}

/// Values from the shared context win over the plan's own copy of the test variables.
fn merge_variables(mut variables: Variables, context: Variables) -> Variables {
    variables.extend(context);
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn context_overrides_plan_variables() {
        let mut plan = Variables::new();
        plan.insert("target".to_string(), json!("a"));
        plan.insert("timeout".to_string(), json!(5));
        let mut context = Variables::new();
        context.insert("target".to_string(), json!("b"));

        let merged = merge_variables(plan, context);

        assert_eq!(Some(&json!("b")), merged.get("target"));
        assert_eq!(Some(&json!(5)), merged.get("timeout"));
    }
}
