use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};
use swarm_instruments::MetricBucket;
use tokio::sync::mpsc::UnboundedSender;

use crate::phase::PhaseDefinition;

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Warn,
    Error,
}

/// A problem reported by a worker.
///
/// Aggregatable errors are expected to repeat, for example a failed request, and are grouped
/// before being shown. Anything at [ErrorLevel::Error] means the worker has stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerError {
    pub error: String,
    pub level: ErrorLevel,
    pub aggregatable: bool,
    #[serde(default)]
    pub logs: Option<Vec<String>>,
}

impl WorkerError {
    pub fn warn(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            level: ErrorLevel::Warn,
            aggregatable: true,
            logs: None,
        }
    }

    pub fn crash(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            level: ErrorLevel::Error,
            aggregatable: false,
            logs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEvent {
    pub index: usize,
    pub id: String,
    pub name: Option<String>,
    pub started_at: u64,
    #[serde(default)]
    pub ended_at: Option<u64>,
    /// Filled in when the event is published downstream.
    #[serde(default)]
    pub definition: Option<PhaseDefinition>,
}

/// Everything a worker can tell the coordinator.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Online,
    ReadyWaiting,
    Running,
    WorkerError(WorkerError),
    PhaseStarted(PhaseEvent),
    PhaseCompleted(PhaseEvent),
    /// Metrics for one period.
    Stats(MetricBucket),
    /// The worker's cumulative metrics, sent once as it exits.
    Done(MetricBucket),
    Log(Vec<String>),
    SetSuggestedExitCode(i32),
}

#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub worker_id: WorkerId,
    pub event: WorkerEvent,
}

pub type WorkerEventSender = UnboundedSender<WorkerMessage>;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerErrorEvent {
    pub worker_id: WorkerId,
    pub error: WorkerError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub worker_id: WorkerId,
    pub args: Vec<String>,
}

/// The merged event stream of a run, as seen by reporters.
#[derive(Debug, Clone)]
pub enum RunEvent {
    PhaseStarted(PhaseEvent),
    PhaseCompleted(PhaseEvent),
    /// Merged metrics for one period.
    Stats(MetricBucket),
    /// The final aggregate, published exactly once.
    Done(MetricBucket),
    WorkerError(WorkerErrorEvent),
    Log(LogEvent),
}

type Subscriber<T> = Box<dyn FnMut(&T) + Send>;

/// Typed publish/subscribe for [RunEvent]s, with one subscriber list per event kind.
#[derive(Default)]
pub struct EventBus {
    phase_started: Vec<Subscriber<PhaseEvent>>,
    phase_completed: Vec<Subscriber<PhaseEvent>>,
    stats: Vec<Subscriber<MetricBucket>>,
    done: Vec<Subscriber<MetricBucket>>,
    worker_error: Vec<Subscriber<WorkerErrorEvent>>,
    log: Vec<Subscriber<LogEvent>>,
}

impl EventBus {
    pub fn on_phase_started(&mut self, f: impl FnMut(&PhaseEvent) + Send + 'static) {
        self.phase_started.push(Box::new(f));
    }

    pub fn on_phase_completed(&mut self, f: impl FnMut(&PhaseEvent) + Send + 'static) {
        self.phase_completed.push(Box::new(f));
    }

    pub fn on_stats(&mut self, f: impl FnMut(&MetricBucket) + Send + 'static) {
        self.stats.push(Box::new(f));
    }

    pub fn on_done(&mut self, f: impl FnMut(&MetricBucket) + Send + 'static) {
        self.done.push(Box::new(f));
    }

    pub fn on_worker_error(&mut self, f: impl FnMut(&WorkerErrorEvent) + Send + 'static) {
        self.worker_error.push(Box::new(f));
    }

    pub fn on_log(&mut self, f: impl FnMut(&LogEvent) + Send + 'static) {
        self.log.push(Box::new(f));
    }

    pub fn publish(&mut self, event: &RunEvent) {
        match event {
            RunEvent::PhaseStarted(e) => notify(&mut self.phase_started, e),
            RunEvent::PhaseCompleted(e) => notify(&mut self.phase_completed, e),
            RunEvent::Stats(e) => notify(&mut self.stats, e),
            RunEvent::Done(e) => notify(&mut self.done, e),
            RunEvent::WorkerError(e) => notify(&mut self.worker_error, e),
            RunEvent::Log(e) => notify(&mut self.log, e),
        }
    }
}

fn notify<T>(subscribers: &mut [Subscriber<T>], event: &T) {
    for subscriber in subscribers.iter_mut() {
        subscriber(event);
    }
}

impl Debug for EventBus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("phase_started", &self.phase_started.len())
            .field("phase_completed", &self.phase_completed.len())
            .field("stats", &self.stats.len())
            .field("done", &self.done.len())
            .field("worker_error", &self.worker_error.len())
            .field("log", &self.log.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn publish_reaches_matching_subscribers() {
        let mut bus = EventBus::default();
        let stats = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let done = Arc::new(parking_lot::Mutex::new(0));

        let stats_sink = stats.clone();
        bus.on_stats(move |bucket| stats_sink.lock().push(bucket.period));
        let done_sink = done.clone();
        bus.on_done(move |_| *done_sink.lock() += 1);

        bus.publish(&RunEvent::Stats(MetricBucket::new(1_000, 1_000)));
        bus.publish(&RunEvent::Stats(MetricBucket::new(2_000, 1_000)));
        bus.publish(&RunEvent::Done(MetricBucket::new(1_000, 2_000)));

        assert_eq!(vec![1_000, 2_000], *stats.lock());
        assert_eq!(1, *done.lock());
    }

    #[test]
    fn worker_id_displays_inner_value() {
        assert_eq!("worker-1", WorkerId::new("worker-1").to_string());
    }
}
