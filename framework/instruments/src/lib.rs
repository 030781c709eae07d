mod bucket;
mod distribution;
mod recorder;
pub mod report;

use std::time::{Duration, Instant};

pub use bucket::{MetricBucket, Rate};
pub use distribution::{Distribution, Summary};
pub use recorder::BucketRecorder;

/// A single timed operation performed by a virtual user.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    operation_id: String,
    started: Instant,
    elapsed: Option<Duration>,
    is_error: bool,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
        }
    }

    /// Stop the clock for this operation, marking it as failed if the response is an error.
    pub fn finish<T, E>(mut self, response: &Result<T, E>) -> Self {
        self.elapsed = Some(self.started.elapsed());
        self.is_error = response.is_err();
        self
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Elapsed time, or the time since the operation started if it was never finished.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}
