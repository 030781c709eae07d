use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::phase::PhaseDefinition;
use crate::plan::{PayloadDataset, Variables};
use crate::types::SwarmResult;

/// The declarative description of a load test, usually read from a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub phases: Vec<PhaseDefinition>,
    #[serde(default)]
    pub payload: Vec<PayloadSource>,
    #[serde(default)]
    pub variables: Variables,
}

/// Where to find a payload dataset. Relative paths are resolved against the definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSource {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub skip_header: bool,
}

impl TestDefinition {
    pub fn from_yaml(yaml: &str) -> SwarmResult<Self> {
        serde_yaml::from_str(yaml).context("Invalid test definition")
    }

    pub fn from_file(path: &Path) -> SwarmResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read test definition {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse test definition {}", path.display()))
    }

    /// Load every payload dataset, once, for the divider to partition.
    pub fn load_payload(&self, base_dir: &Path) -> SwarmResult<Vec<PayloadDataset>> {
        self.payload
            .iter()
            .map(|source| {
                let path = if source.path.is_absolute() {
                    source.path.clone()
                } else {
                    base_dir.join(&source.path)
                };
                PayloadDataset::load_csv(&source.name, &path, source.skip_header)
            })
            .collect()
    }

    /// Seconds the whole test takes when every phase runs to the end.
    pub fn planned_duration_s(&self) -> u64 {
        self.phases
            .iter()
            .filter(|p| p.shape().is_some())
            .map(|p| p.duration_s())
            .sum()
    }
}
