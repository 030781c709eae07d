use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::phase::WorkerPhase;
use crate::types::SwarmResult;

/// Named values from the test definition, and the shared context computed by the setup hook.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// A named table of records that virtual users can draw values from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadDataset {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl PayloadDataset {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Read every record of a CSV file, optionally dropping the first line.
    pub fn load_csv(name: &str, path: &Path, skip_header: bool) -> SwarmResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(skip_header)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open payload file {}", path.display()))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record
                .with_context(|| format!("Failed to read payload file {}", path.display()))?;
            rows.push(record.iter().map(|field| field.to_string()).collect());
        }

        log::debug!(
            "Loaded {} payload rows for dataset [{}] from {}",
            rows.len(),
            name,
            path.display()
        );

        Ok(Self::new(name, rows))
    }

    /// The rows whose position modulo `count` equals `index`.
    pub fn partition(&self, index: usize, count: usize) -> Self {
        let rows = if count == 0 {
            Vec::new()
        } else {
            self.rows
                .iter()
                .enumerate()
                .filter(|(row, _)| row % count == index)
                .map(|(_, values)| values.clone())
                .collect()
        };

        Self::new(self.name.clone(), rows)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Everything a single worker needs to run its share of a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPlan {
    /// 1-based.
    pub worker: usize,
    pub total_workers: usize,
    pub phases: Vec<WorkerPhase>,
    pub variables: Variables,
    pub payload: Vec<PayloadDataset>,
}

impl WorkerPlan {
    /// Seconds this plan takes to run if every phase runs to the end.
    pub fn planned_duration_s(&self) -> u64 {
        self.phases.iter().map(|p| p.duration_s).sum()
    }
}
