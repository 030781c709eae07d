use crate::bucket::MetricBucket;
use crate::report::ReportCollector;

/// Discards everything. Useful in tests and when only the JSON output is wanted.
#[derive(Debug, Default)]
pub struct NoopReportCollector;

impl ReportCollector for NoopReportCollector {
    fn add_period(&mut self, _bucket: &MetricBucket) {}

    fn finalize(&mut self, _aggregate: &MetricBucket) {}
}
