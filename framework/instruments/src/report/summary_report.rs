mod metric_tables;

use chrono::{DateTime, Utc};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::bucket::MetricBucket;
use crate::report::summary_report::metric_tables::{counter_rows, histogram_rows, rate_rows};
use crate::report::ReportCollector;

/// Prints a table of counters, rates and histogram summaries for every period as it is flushed
/// and once more for the whole run.
#[derive(Debug, Default)]
pub struct SummaryReportCollector {
    periods_seen: usize,
}

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn print_bucket(bucket: &MetricBucket) {
        print_table(counter_rows(bucket));
        print_table(rate_rows(bucket));
        print_table(histogram_rows(bucket));
    }
}

impl ReportCollector for SummaryReportCollector {
    fn add_period(&mut self, bucket: &MetricBucket) {
        self.periods_seen += 1;
        let period = DateTime::<Utc>::from_timestamp_millis(bucket.period as i64)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| bucket.period.to_string());
        println!("\nMetrics for period starting {period}");
        Self::print_bucket(bucket);
    }

    fn finalize(&mut self, aggregate: &MetricBucket) {
        println!(
            "\nSummary report ({} intermediate periods)",
            self.periods_seen
        );
        Self::print_bucket(aggregate);
    }
}

fn print_table<R: Tabled>(rows: Vec<R>) {
    if rows.is_empty() {
        return;
    }

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_reported_periods() {
        let mut bucket = MetricBucket::new(1_700_000_000_000, 10_000);
        bucket.incr("vusers.created", 2, 1_700_000_000_500);
        bucket.record("connect.duration_ms", 12, 1_700_000_000_500);
        bucket.summarize();

        let mut collector = SummaryReportCollector::new();
        collector.add_period(&bucket);
        collector.add_period(&bucket);
        collector.finalize(&bucket);

        assert_eq!(2, collector.periods_seen);
    }
}
