use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use swarm_core::prelude::{DelegatedShutdownListener, ShutdownSignalError};
use swarm_instruments::MetricBucket;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{Instant, MissedTickBehavior};

use crate::aggregator::Aggregator;
use crate::event::{ErrorLevel, EventBus, WorkerEvent, WorkerEventSender, WorkerId, WorkerMessage};
use crate::lifecycle::{LifecycleError, WorkerRecord, WorkerState};
use crate::phase::PhaseDefinition;
use crate::plan::{Variables, WorkerPlan};
use crate::platform::{PrepareRequest, WorkerOptions, WorkerPlatform};
use crate::types::{now_ms, SwarmResult};

/// Timing of the coordinating loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub metrics_flush_interval: Duration,
    pub error_flush_interval: Duration,
    pub completion_check_interval: Duration,
    /// How long workers have to come online after being created.
    pub online_timeout: Duration,
    /// How long workers have to accept their plan.
    pub ready_timeout: Duration,
    /// How long stopped workers have to send their final reports after a shutdown.
    pub shutdown_grace: Duration,
    pub worker_options: WorkerOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            metrics_flush_interval: Duration::from_secs(2),
            error_flush_interval: Duration::from_secs(1),
            completion_check_interval: Duration::from_secs(2),
            online_timeout: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(30),
            worker_options: WorkerOptions::default(),
        }
    }
}

/// What a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub aggregate: MetricBucket,
    pub intermediate: Vec<MetricBucket>,
    /// The highest exit code any worker suggested, or 0.
    pub exit_code: i32,
    /// Workers that sent a final report.
    pub clean_exits: usize,
    /// Whether the run was stopped before every worker finished on its own.
    pub interrupted: bool,
}

/// Drives workers on a [WorkerPlatform] through a run and merges what they report.
pub struct Orchestrator<P: WorkerPlatform> {
    platform: P,
    config: OrchestratorConfig,
    aggregator: Aggregator,
    workers: BTreeMap<WorkerId, WorkerRecord>,
    events_sender: Option<WorkerEventSender>,
    events: UnboundedReceiver<WorkerMessage>,
    shutdown_listener: DelegatedShutdownListener,
    stopping: bool,
}

impl<P: WorkerPlatform> Orchestrator<P> {
    pub fn new(
        platform: P,
        config: OrchestratorConfig,
        phases: Vec<PhaseDefinition>,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        let (events_sender, events) = mpsc::unbounded_channel();
        let aggregator = Aggregator::new(platform.desired_worker_count(), phases);

        Self {
            platform,
            config,
            aggregator,
            workers: BTreeMap::new(),
            events_sender: Some(events_sender),
            events,
            shutdown_listener,
            stopping: false,
        }
    }

    /// Subscribe to the merged event stream before the run starts.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        self.aggregator.bus_mut()
    }

    /// Create a worker per plan, start them and coordinate until every worker has exited or the
    /// run is stopped.
    pub async fn run(mut self, plans: Vec<WorkerPlan>, context: Variables) -> SwarmResult<RunOutcome> {
        if let Err(e) = self.launch(plans, &context).await {
            if let Err(shutdown_err) = self.platform.shutdown() {
                log::error!("Failed to shut down workers: {shutdown_err:?}");
            }
            return Err(e);
        }

        self.coordinate().await;

        if let Err(e) = self.platform.shutdown() {
            log::error!("Failed to shut down workers: {e:?}");
        }

        let exit_code = self.aggregator.suggested_exit_code();
        let clean_exits = self.aggregator.clean_exit_count();
        let interrupted = self.stopping;
        let (aggregate, intermediate) = self.aggregator.into_reports();

        Ok(RunOutcome {
            aggregate: aggregate.unwrap_or_default(),
            intermediate,
            exit_code,
            clean_exits,
            interrupted,
        })
    }

    async fn launch(&mut self, plans: Vec<WorkerPlan>, context: &Variables) -> SwarmResult<()> {
        let events_sender = self
            .events_sender
            .take()
            .context("Orchestrator has already been started")?;

        for plan in plans {
            let worker_id = self
                .platform
                .create_worker(events_sender.clone())
                .context("Failed to create worker")?;
            self.workers
                .insert(worker_id.clone(), WorkerRecord::new(worker_id, plan));
        }
        // Only workers hold senders from here on, so the channel closes once they have all gone.
        drop(events_sender);

        log::info!("Created {} workers", self.workers.len());
        self.await_state(WorkerState::Online, self.config.online_timeout)
            .await?;

        let ids: Vec<WorkerId> = self.workers.keys().cloned().collect();
        for worker_id in &ids {
            let Some(record) = self.workers.get_mut(worker_id) else {
                continue;
            };
            if record.has_exited() {
                continue;
            }

            let request = PrepareRequest {
                plan: record.plan.clone(),
                options: self.config.worker_options.clone(),
            };
            record.advance(WorkerState::Preparing)?;
            self.platform.prepare_worker(worker_id, request)?;
        }

        self.await_state(WorkerState::ReadyWaiting, self.config.ready_timeout)
            .await?;

        for worker_id in &ids {
            if self.workers.get(worker_id).is_some_and(|r| !r.has_exited()) {
                self.platform.run_worker(worker_id, context)?;
            }
        }

        log::info!("All workers started");
        Ok(())
    }

    /// Process events until every worker has reached `target` (or exited), bounded by `timeout`.
    async fn await_state(&mut self, target: WorkerState, timeout: Duration) -> SwarmResult<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut shutdown_listener = self.shutdown_listener.clone();

        loop {
            let pending = self
                .workers
                .values()
                .filter(|r| r.state() < target)
                .count();
            if pending == 0 {
                return Ok(());
            }

            tokio::select! {
                message = tokio::time::timeout_at(deadline, self.events.recv()) => match message {
                    Ok(Some(message)) => self.dispatch(message),
                    Ok(None) => anyhow::bail!("All workers went away while waiting for them to reach {target}"),
                    Err(_) => {
                        return Err(LifecycleError::Timeout {
                            target,
                            pending,
                            waited: started.elapsed(),
                        }
                        .into())
                    }
                },
                _ = shutdown_listener.wait_for_shutdown() => {
                    return Err(anyhow::anyhow!(ShutdownSignalError::default()));
                }
            }
        }
    }

    async fn coordinate(&mut self) {
        let mut metrics_ticker = ticker(self.config.metrics_flush_interval);
        let mut error_ticker = ticker(self.config.error_flush_interval);
        let mut completion_ticker = ticker(self.config.completion_check_interval);
        let mut shutdown_listener = self.shutdown_listener.clone();
        let mut grace_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                message = self.events.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => {
                        log::debug!("Every worker has closed its event channel");
                        self.aggregator.finish();
                        break;
                    }
                },
                _ = metrics_ticker.tick() => {
                    self.aggregator.flush_intermediate_metrics(false, now_ms());
                }
                _ = error_ticker.tick() => {
                    self.aggregator.flush_errors(now_ms());
                }
                _ = completion_ticker.tick() => {
                    if self.aggregator.check_completion() {
                        break;
                    }
                }
                _ = shutdown_listener.wait_for_shutdown(), if !self.stopping => {
                    self.stop_workers();
                    grace_deadline = Some(Instant::now() + self.config.shutdown_grace);
                }
                _ = tokio::time::sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if grace_deadline.is_some() => {
                    log::warn!(
                        "Gave up waiting for final reports, {} of {} workers exited",
                        self.aggregator.exited_count(),
                        self.platform.desired_worker_count()
                    );
                    self.aggregator.finish();
                    break;
                }
            }
        }
    }

    fn stop_workers(&mut self) {
        log::info!("Stopping workers");
        self.stopping = true;

        for (worker_id, record) in &self.workers {
            if record.has_exited() {
                continue;
            }
            if let Err(e) = self.platform.stop_worker(worker_id) {
                log::warn!("Failed to stop worker {worker_id}: {e:?}");
            }
        }
    }

    fn dispatch(&mut self, message: WorkerMessage) {
        let next = match &message.event {
            WorkerEvent::Online => Some(WorkerState::Online),
            WorkerEvent::ReadyWaiting => Some(WorkerState::ReadyWaiting),
            WorkerEvent::Running => Some(WorkerState::Running),
            WorkerEvent::Done(_) => Some(WorkerState::Exited),
            WorkerEvent::WorkerError(error) if error.level != ErrorLevel::Warn => {
                Some(WorkerState::Exited)
            }
            _ => None,
        };

        if let Some(next) = next {
            match self.workers.get_mut(&message.worker_id) {
                Some(record) => {
                    if let Err(e) = record.advance(next) {
                        log::warn!("{e}");
                    }
                }
                None => log::warn!("{}", LifecycleError::UnknownWorker(message.worker_id.clone())),
            }
        }

        self.aggregator.handle(message, now_ms());
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WorkerError;
    use crate::phase::{PhaseShape, WorkerPhase};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use swarm_core::prelude::ShutdownHandle;

    const PERIOD: u64 = 1_700_000_000_000;

    /// Answers every command immediately with the event a real worker would send.
    #[derive(Default)]
    struct ScriptedPlatform {
        workers: BTreeMap<WorkerId, WorkerEventSender>,
        desired: usize,
        ignore_prepare: bool,
        crash_on_run: Option<WorkerId>,
        hold_on_run: bool,
    }

    impl ScriptedPlatform {
        fn new(desired: usize) -> Self {
            Self {
                desired,
                ..Default::default()
            }
        }

        fn send(&self, worker_id: &WorkerId, event: WorkerEvent) {
            let _ = self.workers[worker_id].send(WorkerMessage {
                worker_id: worker_id.clone(),
                event,
            });
        }
    }

    impl WorkerPlatform for ScriptedPlatform {
        fn create_worker(&mut self, events: WorkerEventSender) -> SwarmResult<WorkerId> {
            let worker_id = WorkerId::new(format!("scripted-{}", self.workers.len() + 1));
            self.workers.insert(worker_id.clone(), events);
            self.send(&worker_id, WorkerEvent::Online);
            Ok(worker_id)
        }

        fn prepare_worker(&mut self, worker_id: &WorkerId, _: PrepareRequest) -> SwarmResult<()> {
            if !self.ignore_prepare {
                self.send(worker_id, WorkerEvent::ReadyWaiting);
            }
            Ok(())
        }

        fn run_worker(&mut self, worker_id: &WorkerId, _: &Variables) -> SwarmResult<()> {
            self.send(worker_id, WorkerEvent::Running);

            if self.crash_on_run.as_ref() == Some(worker_id) {
                self.send(
                    worker_id,
                    WorkerEvent::WorkerError(WorkerError::crash("segfault")),
                );
                return Ok(());
            }

            let mut bucket = MetricBucket::new(PERIOD, 10_000);
            bucket.incr("requests", 2, PERIOD + 5);
            self.send(worker_id, WorkerEvent::Stats(bucket.clone()));

            if !self.hold_on_run {
                self.send(worker_id, WorkerEvent::SetSuggestedExitCode(3));
                self.send(worker_id, WorkerEvent::Done(bucket));
            }
            Ok(())
        }

        fn stop_worker(&mut self, worker_id: &WorkerId) -> SwarmResult<()> {
            self.send(worker_id, WorkerEvent::Done(MetricBucket::new(PERIOD, 0)));
            Ok(())
        }

        fn shutdown(&mut self) -> SwarmResult<()> {
            self.workers.clear();
            Ok(())
        }

        fn desired_worker_count(&self) -> usize {
            self.desired
        }
    }

    fn plans(n: usize) -> Vec<WorkerPlan> {
        (1..=n)
            .map(|worker| WorkerPlan {
                worker,
                total_workers: n,
                phases: vec![WorkerPhase {
                    index: 0,
                    id: "phase".to_string(),
                    name: None,
                    duration_s: 1,
                    shape: PhaseShape::Pause,
                    standby: false,
                    worker,
                    total_workers: n,
                }],
                variables: Variables::new(),
                payload: vec![],
            })
            .collect()
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            metrics_flush_interval: Duration::from_millis(10),
            error_flush_interval: Duration::from_millis(10),
            completion_check_interval: Duration::from_millis(10),
            online_timeout: Duration::from_millis(200),
            ready_timeout: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(200),
            worker_options: WorkerOptions::default(),
        }
    }

    #[tokio::test]
    async fn run_to_completion() {
        let shutdown = ShutdownHandle::new();
        let mut orchestrator = Orchestrator::new(
            ScriptedPlatform::new(3),
            fast_config(),
            vec![],
            shutdown.new_listener(),
        );

        let done_events = Arc::new(Mutex::new(0));
        let sink = done_events.clone();
        orchestrator.bus_mut().on_done(move |_| *sink.lock() += 1);

        let outcome = orchestrator.run(plans(3), Variables::new()).await.unwrap();

        assert_eq!(1, *done_events.lock());
        assert_eq!(6, outcome.aggregate.counter("requests"));
        assert_eq!(1, outcome.intermediate.len());
        assert_eq!(6, outcome.intermediate[0].counter("requests"));
        assert_eq!(3, outcome.exit_code);
        assert_eq!(3, outcome.clean_exits);
        assert!(!outcome.interrupted);
    }

    #[tokio::test]
    async fn crashed_worker_still_completes_run() {
        let shutdown = ShutdownHandle::new();
        let mut platform = ScriptedPlatform::new(2);
        platform.crash_on_run = Some(WorkerId::new("scripted-2"));

        let outcome = Orchestrator::new(platform, fast_config(), vec![], shutdown.new_listener())
            .run(plans(2), Variables::new())
            .await
            .unwrap();

        assert_eq!(1, outcome.clean_exits);
        assert_eq!(2, outcome.aggregate.counter("requests"));
    }

    #[tokio::test]
    async fn timeout_waiting_for_ready() {
        let shutdown = ShutdownHandle::new();
        let mut platform = ScriptedPlatform::new(2);
        platform.ignore_prepare = true;

        let err = Orchestrator::new(platform, fast_config(), vec![], shutdown.new_listener())
            .run(plans(2), Variables::new())
            .await
            .unwrap_err();

        match err.downcast_ref::<LifecycleError>() {
            Some(LifecycleError::Timeout {
                target, pending, ..
            }) => {
                assert_eq!(WorkerState::ReadyWaiting, *target);
                assert_eq!(2, *pending);
            }
            other => panic!("Expected a timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_stops_workers_and_reports() {
        let shutdown = ShutdownHandle::new();
        let mut platform = ScriptedPlatform::new(2);
        platform.hold_on_run = true;

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.shutdown();
        });

        let outcome = Orchestrator::new(platform, fast_config(), vec![], shutdown.new_listener())
            .run(plans(2), Variables::new())
            .await
            .unwrap();

        assert!(outcome.interrupted);
        assert_eq!(2, outcome.clean_exits);
        assert_eq!(1, outcome.intermediate.len());
        assert_eq!(4, outcome.intermediate[0].counter("requests"));
    }
}
