use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use swarm_instruments::MetricBucket;

use crate::error_buffer::{ErrorBuffer, GroupedError};
use crate::event::{
    ErrorLevel, EventBus, LogEvent, PhaseEvent, RunEvent, WorkerError, WorkerErrorEvent, WorkerEvent,
    WorkerId, WorkerMessage,
};
use crate::phase::PhaseDefinition;

/// Errors are held this long before being grouped and shown.
pub const ERROR_FLUSH_AGE_MS: u64 = 9_000;

/// How long to wait for every worker to report a period before flushing whatever has arrived.
///
/// Thirty seconds plus three more for every ten workers.
pub fn quorum_patience_ms(desired_workers: usize) -> u64 {
    let batches = desired_workers.div_ceil(10) as u64;
    (batches * 3 + 30) * 1_000
}

/// Merges the events of every worker in a run into one ordered stream.
///
/// All state is owned here and only touched by the coordinating task, callers pass in the current
/// time so decisions are reproducible.
#[derive(Debug)]
pub struct Aggregator {
    desired_worker_count: usize,
    phases: Vec<PhaseDefinition>,
    bus: EventBus,
    phase_started_seen: HashMap<usize, PhaseEvent>,
    phase_completed_seen: HashMap<usize, PhaseEvent>,
    pending_periods: BTreeMap<u64, BTreeMap<WorkerId, MetricBucket>>,
    periods_reported_for: BTreeSet<u64>,
    intermediate: Vec<MetricBucket>,
    final_reports: BTreeMap<WorkerId, MetricBucket>,
    exited_workers: HashSet<WorkerId>,
    errors: ErrorBuffer,
    suggested_exit_code: i32,
    aggregate: Option<MetricBucket>,
}

impl Aggregator {
    pub fn new(desired_worker_count: usize, phases: Vec<PhaseDefinition>) -> Self {
        Self {
            desired_worker_count,
            phases,
            bus: EventBus::default(),
            phase_started_seen: HashMap::new(),
            phase_completed_seen: HashMap::new(),
            pending_periods: BTreeMap::new(),
            periods_reported_for: BTreeSet::new(),
            intermediate: Vec::new(),
            final_reports: BTreeMap::new(),
            exited_workers: HashSet::new(),
            errors: ErrorBuffer::default(),
            suggested_exit_code: 0,
            aggregate: None,
        }
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn handle(&mut self, message: WorkerMessage, now: u64) {
        let WorkerMessage { worker_id, event } = message;

        if self.is_done() {
            log::debug!("Ignoring event from worker {worker_id} after the run completed: {event:?}");
            return;
        }

        match event {
            WorkerEvent::Online | WorkerEvent::ReadyWaiting | WorkerEvent::Running => {}
            WorkerEvent::PhaseStarted(phase) => self.on_phase_started(phase),
            WorkerEvent::PhaseCompleted(phase) => self.on_phase_completed(phase),
            WorkerEvent::Stats(bucket) => self.add_snapshot(worker_id, bucket),
            WorkerEvent::Done(bucket) => {
                self.final_reports.insert(worker_id.clone(), bucket);
                self.mark_exited(&worker_id);
            }
            WorkerEvent::WorkerError(error) => self.on_worker_error(worker_id, error, now),
            WorkerEvent::Log(args) => {
                log::info!("[{worker_id}] {}", args.join(" "));
                self.bus
                    .publish(&RunEvent::Log(LogEvent { worker_id, args }));
            }
            WorkerEvent::SetSuggestedExitCode(code) => {
                self.suggested_exit_code = self.suggested_exit_code.max(code);
            }
        }
    }

    fn on_phase_started(&mut self, mut phase: PhaseEvent) {
        if self.phase_started_seen.contains_key(&phase.index) {
            return;
        }

        phase.definition = self.phases.get(phase.index).cloned();
        log::info!(
            "Phase {} started{}",
            phase.index,
            phase.name.as_ref().map(|n| format!(": {n}")).unwrap_or_default()
        );
        self.bus.publish(&RunEvent::PhaseStarted(phase.clone()));
        self.phase_started_seen.insert(phase.index, phase);
    }

    fn on_phase_completed(&mut self, mut phase: PhaseEvent) {
        if self.phase_completed_seen.contains_key(&phase.index) {
            return;
        }

        phase.definition = self.phases.get(phase.index).cloned();
        log::info!(
            "Phase {} completed{}",
            phase.index,
            phase.name.as_ref().map(|n| format!(": {n}")).unwrap_or_default()
        );
        self.bus.publish(&RunEvent::PhaseCompleted(phase.clone()));
        self.phase_completed_seen.insert(phase.index, phase);
    }

    fn add_snapshot(&mut self, worker_id: WorkerId, bucket: MetricBucket) {
        if self.periods_reported_for.contains(&bucket.period) {
            log::warn!(
                "Dropping late metrics from worker {worker_id} for period {} which was already reported",
                bucket.period
            );
            return;
        }

        let snapshots = self.pending_periods.entry(bucket.period).or_default();
        match snapshots.get_mut(&worker_id) {
            Some(existing) => existing.absorb(&bucket),
            None => {
                snapshots.insert(worker_id, bucket);
            }
        }
    }

    fn on_worker_error(&mut self, worker_id: WorkerId, error: WorkerError, now: u64) {
        if error.level != ErrorLevel::Warn {
            self.mark_exited(&worker_id);
        }

        if error.aggregatable {
            self.errors.push(error.error.clone(), now);
        } else {
            match error.level {
                ErrorLevel::Warn => log::warn!("Worker {worker_id}: {}", error.error),
                ErrorLevel::Error => log::error!("Worker {worker_id} failed: {}", error.error),
            }
            for line in error.logs.iter().flatten() {
                log::error!("[{worker_id}] {line}");
            }
        }

        self.bus
            .publish(&RunEvent::WorkerError(WorkerErrorEvent { worker_id, error }));
    }

    fn mark_exited(&mut self, worker_id: &WorkerId) {
        if self.exited_workers.insert(worker_id.clone()) {
            log::debug!(
                "Worker {worker_id} exited, {} of {} done",
                self.exited_workers.len(),
                self.desired_worker_count
            );
        }
    }

    /// Publish merged metrics for pending periods.
    ///
    /// With `flush_all` every pending period goes out in order. Otherwise only the earliest period
    /// is considered, and only once every worker has reported it or it has waited long enough.
    pub fn flush_intermediate_metrics(&mut self, flush_all: bool, now: u64) {
        if flush_all {
            let periods: Vec<u64> = self.pending_periods.keys().copied().collect();
            for period in periods {
                self.flush_period(period);
            }
            return;
        }

        let Some((&earliest, snapshots)) = self.pending_periods.iter().next() else {
            return;
        };

        let quorum = snapshots.len() >= self.desired_worker_count;
        let timed_out =
            now.saturating_sub(earliest) > quorum_patience_ms(self.desired_worker_count);

        if quorum {
            self.flush_period(earliest);
        } else if timed_out {
            log::debug!(
                "Flushing period {earliest} with {} of {} workers reported",
                snapshots.len(),
                self.desired_worker_count
            );
            self.flush_period(earliest);
        }
    }

    fn flush_period(&mut self, period: u64) {
        let Some(snapshots) = self.pending_periods.remove(&period) else {
            return;
        };

        let mut merged = MetricBucket::merge(period, snapshots.values());
        merged.summarize();

        self.periods_reported_for.insert(period);
        self.bus.publish(&RunEvent::Stats(merged.clone()));
        self.intermediate.push(merged);
    }

    /// Show errors that have been held long enough, one line per distinct message.
    pub fn flush_errors(&mut self, now: u64) {
        let grouped = self.errors.take_older_than(now, ERROR_FLUSH_AGE_MS);
        self.report_errors(grouped);
    }

    fn report_errors(&mut self, grouped: Vec<GroupedError>) {
        for GroupedError { message, count } in grouped {
            if count > 1 {
                log::warn!("{message} ({count} occurrences)");
            } else {
                log::warn!("{message}");
            }
        }

        let dropped = self.errors.take_dropped();
        if dropped > 0 {
            log::warn!("{dropped} more worker errors were discarded because too many arrived at once");
        }
    }

    /// Finish the run if every worker has exited. Returns whether the run is done.
    pub fn check_completion(&mut self) -> bool {
        if !self.is_done() && self.exited_workers.len() >= self.desired_worker_count {
            self.finish();
        }

        self.is_done()
    }

    /// Flush everything and publish the final aggregate from whichever workers reported.
    ///
    /// Only the first call has any effect.
    pub fn finish(&mut self) {
        if self.is_done() {
            return;
        }

        self.flush_intermediate_metrics(true, 0);
        let remaining = self.errors.take_all();
        self.report_errors(remaining);

        if self.final_reports.len() < self.desired_worker_count {
            log::warn!(
                "Final report built from {} of {} workers",
                self.final_reports.len(),
                self.desired_worker_count
            );
        }

        let period = self
            .final_reports
            .values()
            .map(|b| b.period)
            .min()
            .unwrap_or_default();
        let mut aggregate = MetricBucket::merge(period, self.final_reports.values());
        aggregate.summarize();

        self.bus.publish(&RunEvent::Done(aggregate.clone()));
        self.aggregate = Some(aggregate);
    }

    pub fn is_done(&self) -> bool {
        self.aggregate.is_some()
    }

    pub fn has_exited(&self, worker_id: &WorkerId) -> bool {
        self.exited_workers.contains(worker_id)
    }

    pub fn exited_count(&self) -> usize {
        self.exited_workers.len()
    }

    pub fn clean_exit_count(&self) -> usize {
        self.final_reports.len()
    }

    pub fn suggested_exit_code(&self) -> i32 {
        self.suggested_exit_code
    }

    pub fn aggregate(&self) -> Option<&MetricBucket> {
        self.aggregate.as_ref()
    }

    /// The final aggregate, if the run finished, and every intermediate period in order.
    pub fn into_reports(self) -> (Option<MetricBucket>, Vec<MetricBucket>) {
        (self.aggregate, self.intermediate)
    }
}
