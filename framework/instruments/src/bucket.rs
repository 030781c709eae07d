use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::distribution::{Distribution, Summary};

/// A count of events observed over a window of time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub count: u64,
    pub window_ms: u64,
}

impl Rate {
    pub fn per_second(&self) -> f64 {
        if self.window_ms == 0 {
            return 0.0;
        }
        self.count as f64 * 1000.0 / self.window_ms as f64
    }

    /// Combine two rates observed over the same window by different workers.
    pub fn merge(&mut self, other: &Rate) {
        self.count += other.count;
        self.window_ms = self.window_ms.max(other.window_ms);
    }
}

/// Metrics for one period, keyed by the period start timestamp in milliseconds since the epoch.
///
/// Workers produce one bucket per period (intermediate) and one cumulative bucket when they exit
/// (final). The coordinator merges buckets from all workers for the same period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricBucket {
    pub period: u64,
    pub window_ms: u64,
    pub first_metric_at: Option<u64>,
    pub last_metric_at: Option<u64>,
    pub counters: BTreeMap<String, u64>,
    pub rates: BTreeMap<String, Rate>,
    pub histograms: BTreeMap<String, Distribution>,
    #[serde(default)]
    pub summaries: BTreeMap<String, Summary>,
}

impl MetricBucket {
    pub fn new(period: u64, window_ms: u64) -> Self {
        Self {
            period,
            window_ms,
            ..Default::default()
        }
    }

    /// Merge a set of buckets into a new bucket for `period`.
    ///
    /// Counters are summed, rates combined and histograms merged. Summaries are not computed, call
    /// [MetricBucket::summarize] once all inputs are merged.
    pub fn merge<'a>(period: u64, buckets: impl IntoIterator<Item = &'a MetricBucket>) -> Self {
        let mut merged = MetricBucket::new(period, 0);
        for bucket in buckets {
            merged.absorb(bucket);
        }
        merged
    }

    /// Merge another bucket into this one.
    pub fn absorb(&mut self, other: &MetricBucket) {
        self.window_ms = self.window_ms.max(other.window_ms);
        self.first_metric_at = min_option(self.first_metric_at, other.first_metric_at);
        self.last_metric_at = self.last_metric_at.max(other.last_metric_at);

        for (name, value) in &other.counters {
            *self.counters.entry(name.clone()).or_default() += value;
        }
        for (name, rate) in &other.rates {
            self.rates.entry(name.clone()).or_default().merge(rate);
        }
        for (name, distribution) in &other.histograms {
            self.histograms
                .entry(name.clone())
                .or_default()
                .merge(distribution);
        }
    }

    /// Compute the summary of every histogram in this bucket.
    pub fn summarize(&mut self) {
        self.summaries = self
            .histograms
            .iter()
            .map(|(name, distribution)| (name.clone(), distribution.summarize()))
            .collect();
    }

    pub fn incr(&mut self, name: &str, by: u64, at: u64) {
        self.touch(at);
        *self.counters.entry(name.to_string()).or_default() += by;
    }

    pub fn record(&mut self, name: &str, value: u64, at: u64) {
        self.touch(at);
        self.histograms
            .entry(name.to_string())
            .or_default()
            .record(value);
    }

    pub fn mark(&mut self, name: &str, at: u64) {
        self.touch(at);
        let window_ms = self.window_ms;
        self.rates
            .entry(name.to_string())
            .or_insert_with(|| Rate {
                count: 0,
                window_ms,
            })
            .count += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.rates.is_empty() && self.histograms.is_empty()
    }

    fn touch(&mut self, at: u64) {
        self.first_metric_at = min_option(self.first_metric_at, Some(at));
        self.last_metric_at = self.last_metric_at.max(Some(at));
    }
}

fn min_option(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
