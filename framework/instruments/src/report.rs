mod noop_report;
mod summary_report;

use crate::bucket::MetricBucket;

pub use noop_report::NoopReportCollector;
pub use summary_report::SummaryReportCollector;

/// Consumes the merged metrics published by the coordinator.
pub trait ReportCollector: Send {
    /// Called once for every flushed period, in chronological order.
    fn add_period(&mut self, bucket: &MetricBucket);

    /// Called once with the aggregate of every worker's final report.
    fn finalize(&mut self, aggregate: &MetricBucket);
}
