use hdrhistogram::serialization::{Deserializer as HistogramDeserializer, Serializer as _, V2Serializer};
use hdrhistogram::Histogram;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of significant figures kept by every distribution.
const SIGNIFICANT_FIGURES: u8 = 3;

/// A mergeable distribution of recorded values, backed by an auto-resizing HDR histogram.
///
/// Serializes to the compact HDR V2 binary format so that a worker's distributions can be shipped
/// to the coordinator and merged there without losing precision.
#[derive(Debug, Clone)]
pub struct Distribution {
    histogram: Histogram<u64>,
}

impl Default for Distribution {
    fn default() -> Self {
        Self::new()
    }
}

impl Distribution {
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new(SIGNIFICANT_FIGURES)
                .expect("3 significant figures is a valid histogram precision"),
        }
    }

    pub fn record(&mut self, value: u64) {
        if let Err(e) = self.histogram.record(value) {
            log::warn!("Dropped value {value} from distribution: {e:?}");
        }
    }

    pub fn merge(&mut self, other: &Distribution) {
        if let Err(e) = self.histogram.add(&other.histogram) {
            log::warn!("Failed to merge distributions: {e:?}");
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn summarize(&self) -> Summary {
        if self.histogram.is_empty() {
            return Summary::default();
        }

        let h = &self.histogram;
        Summary {
            count: h.len(),
            min: h.min(),
            max: h.max(),
            mean: h.mean(),
            p50: h.value_at_quantile(0.5),
            p75: h.value_at_quantile(0.75),
            p90: h.value_at_quantile(0.9),
            p95: h.value_at_quantile(0.95),
            p99: h.value_at_quantile(0.99),
            p999: h.value_at_quantile(0.999),
        }
    }
}

impl Serialize for Distribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = Vec::new();
        V2Serializer::new()
            .serialize(&self.histogram, &mut buf)
            .map_err(|e| serde::ser::Error::custom(format!("{e:?}")))?;
        serializer.serialize_bytes(&buf)
    }
}

impl<'de> Deserialize<'de> for Distribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let mut histogram: Histogram<u64> = HistogramDeserializer::new()
            .deserialize(&mut bytes.as_slice())
            .map_err(|e| serde::de::Error::custom(format!("{e:?}")))?;
        histogram.auto(true);
        Ok(Self { histogram })
    }
}

/// Derived statistics for a [Distribution].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
}
