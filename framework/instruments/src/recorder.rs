use std::collections::BTreeMap;
use std::time::Duration;

use crate::bucket::MetricBucket;
use crate::OperationRecord;

/// Accumulates a worker's metrics into wall-clock aligned periods.
///
/// Period boundaries are multiples of the period length since the epoch so that buckets produced
/// by independent workers for the same window share the same key. A cumulative bucket covering
/// the whole run is kept alongside and becomes the worker's final report.
#[derive(Debug)]
pub struct BucketRecorder {
    period_ms: u64,
    open: BTreeMap<u64, MetricBucket>,
    total: MetricBucket,
}

impl BucketRecorder {
    pub fn new(period: Duration) -> Self {
        let period_ms = (period.as_millis() as u64).max(1);
        Self {
            period_ms,
            open: BTreeMap::new(),
            total: MetricBucket::new(0, 0),
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn period_start(&self, at: u64) -> u64 {
        at - at % self.period_ms
    }

    pub fn incr(&mut self, name: &str, by: u64, at: u64) {
        self.bucket_at(at).incr(name, by, at);
        self.total.incr(name, by, at);
    }

    pub fn record(&mut self, name: &str, value: u64, at: u64) {
        self.bucket_at(at).record(name, value, at);
        self.total.record(name, value, at);
    }

    pub fn mark(&mut self, name: &str, at: u64) {
        self.bucket_at(at).mark(name, at);
        self.total.mark(name, at);
    }

    /// Record a finished operation as `<id>.duration_ms` plus a success or error counter.
    pub fn add_operation(&mut self, operation: &OperationRecord, at: u64) {
        let id = operation.operation_id();
        self.record(
            &format!("{id}.duration_ms"),
            operation.elapsed().as_millis() as u64,
            at,
        );
        if operation.is_error() {
            self.incr(&format!("{id}.errors"), 1, at);
        } else {
            self.incr(&format!("{id}.ok"), 1, at);
        }
    }

    /// Remove and return every period which ended at or before `now`, oldest first.
    pub fn take_completed(&mut self, now: u64) -> Vec<MetricBucket> {
        let still_open = self.open.split_off(&self.period_start(now));
        let completed = std::mem::replace(&mut self.open, still_open);
        completed.into_values().collect()
    }

    /// Remove and return every period, including the one still in progress.
    pub fn take_all(&mut self) -> Vec<MetricBucket> {
        std::mem::take(&mut self.open).into_values().collect()
    }

    /// The cumulative bucket for the whole run, summarized.
    pub fn finish(&self) -> MetricBucket {
        let mut total = self.total.clone();
        total.period = total.first_metric_at.map(|at| self.period_start(at)).unwrap_or_default();
        total.window_ms = match (total.first_metric_at, total.last_metric_at) {
            (Some(first), Some(last)) => (last - first).max(1),
            _ => 0,
        };
        let window_ms = total.window_ms;
        for rate in total.rates.values_mut() {
            rate.window_ms = window_ms;
        }
        total.summarize();
        total
    }

    fn bucket_at(&mut self, at: u64) -> &mut MetricBucket {
        let period = self.period_start(at);
        let period_ms = self.period_ms;
        self.open
            .entry(period)
            .or_insert_with(|| MetricBucket::new(period, period_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_land_in_aligned_periods() {
        let mut recorder = BucketRecorder::new(Duration::from_secs(10));
        recorder.incr("vusers.created", 1, 20_001);
        recorder.incr("vusers.created", 1, 29_999);
        recorder.incr("vusers.created", 1, 30_000);

        let buckets = recorder.take_all();
        assert_eq!(2, buckets.len());
        assert_eq!(20_000, buckets[0].period);
        assert_eq!(2, buckets[0].counter("vusers.created"));
        assert_eq!(30_000, buckets[1].period);
        assert_eq!(1, buckets[1].counter("vusers.created"));
    }

    #[test]
    fn only_finished_periods_are_taken() {
        let mut recorder = BucketRecorder::new(Duration::from_secs(10));
        recorder.mark("arrivals", 5_000);
        recorder.mark("arrivals", 15_000);

        let done = recorder.take_completed(19_000);
        assert_eq!(1, done.len());
        assert_eq!(0, done[0].period);

        let done = recorder.take_completed(20_000);
        assert_eq!(1, done.len());
        assert_eq!(10_000, done[0].period);
        assert!(recorder.take_all().is_empty());
    }

    #[test]
    fn final_bucket_spans_the_whole_run() {
        let mut recorder = BucketRecorder::new(Duration::from_secs(10));
        recorder.mark("arrivals", 10_000);
        recorder.mark("arrivals", 30_000);
        let op = OperationRecord::new("connect").finish(&Ok::<(), ()>(()));
        recorder.add_operation(&op, 31_000);
        let _ = recorder.take_completed(40_000);

        let total = recorder.finish();
        assert_eq!(10_000, total.period);
        assert_eq!(21_000, total.window_ms);
        assert_eq!(2, total.rates["arrivals"].count);
        assert_eq!(21_000, total.rates["arrivals"].window_ms);
        assert_eq!(1, total.counter("connect.ok"));
        assert_eq!(1, total.summaries["connect.duration_ms"].count);
    }
}
