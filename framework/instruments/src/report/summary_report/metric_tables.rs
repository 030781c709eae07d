use tabled::Tabled;

use crate::bucket::MetricBucket;

#[derive(Tabled)]
pub struct CounterRow {
    pub name: String,
    pub value: u64,
}

#[derive(Tabled)]
pub struct RateRow {
    pub name: String,
    #[tabled(display = "float2")]
    pub per_second: f64,
}

#[derive(Tabled)]
pub struct HistogramRow {
    pub name: String,
    pub count: u64,
    pub min: u64,
    pub max: u64,
    #[tabled(display = "float2")]
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

pub fn counter_rows(bucket: &MetricBucket) -> Vec<CounterRow> {
    bucket
        .counters
        .iter()
        .map(|(name, value)| CounterRow {
            name: name.clone(),
            value: *value,
        })
        .collect()
}

pub fn rate_rows(bucket: &MetricBucket) -> Vec<RateRow> {
    bucket
        .rates
        .iter()
        .map(|(name, rate)| RateRow {
            name: name.clone(),
            per_second: rate.per_second(),
        })
        .collect()
}

pub fn histogram_rows(bucket: &MetricBucket) -> Vec<HistogramRow> {
    bucket
        .summaries
        .iter()
        .map(|(name, s)| HistogramRow {
            name: name.clone(),
            count: s.count,
            min: s.min,
            max: s.max,
            mean: s.mean,
            p50: s.p50,
            p95: s.p95,
            p99: s.p99,
        })
        .collect()
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
