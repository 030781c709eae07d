use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{PlatformOpt, ReporterOpt, SwarmScenarioCli};
use crate::context::{RunnerContext, VuContext};
use crate::orchestrator::OrchestratorConfig;
use crate::plan::PayloadDataset;
use crate::test_definition::TestDefinition;
use crate::types::SwarmResult;

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut = fn(&mut RunnerContext) -> HookResult;
pub type GlobalHook = fn(&RunnerContext) -> HookResult;
pub type VuBehaviour = fn(&mut VuContext) -> HookResult;

pub const DEFAULT_RUN_SUMMARY_PATH: &str = "run_summary.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("No virtual user behaviour was set, call `use_vu_behaviour` on the scenario")]
    MissingBehaviour,
    #[error("No test definition was given, pass `--definition <file>`")]
    MissingTestDefinition,
    #[error("The metrics period must be at least one second")]
    InvalidPeriod,
    #[error("At least one {0} is required")]
    NoWorkers(&'static str),
}

/// How the load is spread over workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Divide the load between up to this many workers.
    Divide(usize),
    /// Run the whole test this many times over.
    Replicate(usize),
}

/// The builder for a scenario definition.
///
/// This must be used at the start of a scenario to define how virtual users behave and which
/// hooks to run around the test.
pub struct ScenarioDefinitionBuilder {
    /// The name of the scenario, used when the test definition does not name the test.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: SwarmScenarioCli,
    /// Loaded from the CLI's `--definition` unless given directly.
    test_definition: Option<TestDefinition>,
    /// Global setup hook. It runs once, before any worker is created, and can change the shared
    /// context every worker receives.
    setup_fn: Option<GlobalHookMut>,
    /// What each virtual user does when it arrives.
    vu_behaviour: Option<VuBehaviour>,
    /// Global teardown hook. It runs once after the workers have finished, on a best effort basis.
    teardown_fn: Option<GlobalHook>,
    orchestrator_config: OrchestratorConfig,
}

pub(crate) struct ScenarioDefinition {
    pub(crate) name: String,
    pub(crate) test: TestDefinition,
    pub(crate) payload: Vec<PayloadDataset>,
    pub(crate) split: SplitMode,
    pub(crate) platform: PlatformOpt,
    pub(crate) setup_fn: Option<GlobalHookMut>,
    pub(crate) vu_behaviour: VuBehaviour,
    pub(crate) teardown_fn: Option<GlobalHook>,
    pub(crate) orchestrator_config: OrchestratorConfig,
    pub(crate) reporter: ReporterOpt,
    pub(crate) no_progress: bool,
    pub(crate) run_id: Option<String>,
    pub(crate) output: Option<PathBuf>,
    pub(crate) summary_path: PathBuf,
}

impl ScenarioDefinitionBuilder {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    pub fn new(name: &str, cli: SwarmScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            test_definition: None,
            setup_fn: None,
            vu_behaviour: None,
            teardown_fn: None,
            orchestrator_config: OrchestratorConfig::default(),
        }
    }

    /// Initialise logging, parse the command line and create a new scenario definition.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, crate::init::init())
    }

    /// Use this test definition instead of reading one from `--definition`.
    pub fn with_test_definition(mut self, test_definition: TestDefinition) -> Self {
        self.test_definition = Some(test_definition);
        self
    }

    /// Override the timing of the coordinator. Mostly useful for tests.
    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator_config = config;
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the virtual user behaviour [ScenarioDefinitionBuilder::vu_behaviour] for this scenario.
    pub fn use_vu_behaviour(mut self, behaviour: VuBehaviour) -> Self {
        self.vu_behaviour = Some(behaviour);
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    pub(crate) fn build(self) -> SwarmResult<ScenarioDefinition> {
        let vu_behaviour = self.vu_behaviour.ok_or(DefinitionError::MissingBehaviour)?;

        let (test, base_dir) = match (self.test_definition, &self.cli.definition) {
            (Some(test), _) => (test, PathBuf::from(".")),
            (None, Some(path)) => (
                TestDefinition::from_file(path)?,
                path.parent().map(Path::to_path_buf).unwrap_or_default(),
            ),
            (None, None) => return Err(DefinitionError::MissingTestDefinition.into()),
        };
        let payload = test.load_payload(&base_dir)?;

        let split = match (self.cli.replicas, self.cli.workers) {
            (Some(0), _) => return Err(DefinitionError::NoWorkers("replica").into()),
            (Some(count), _) => SplitMode::Replicate(count),
            (None, Some(0)) => return Err(DefinitionError::NoWorkers("worker").into()),
            (None, Some(workers)) => SplitMode::Divide(workers),
            (None, None) => SplitMode::Divide(
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
            ),
        };

        if self.cli.period == 0 {
            return Err(DefinitionError::InvalidPeriod.into());
        }
        let mut orchestrator_config = self.orchestrator_config;
        orchestrator_config.worker_options.period = Duration::from_secs(self.cli.period);

        let summary_path = self
            .cli
            .summary_path
            .clone()
            .or_else(|| std::env::var_os("RUN_SUMMARY_PATH").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RUN_SUMMARY_PATH));

        Ok(ScenarioDefinition {
            name: test.name.clone().unwrap_or(self.name),
            test,
            payload,
            split,
            platform: self.cli.platform,
            setup_fn: self.setup_fn,
            vu_behaviour,
            teardown_fn: self.teardown_fn,
            orchestrator_config,
            reporter: self.cli.reporter,
            no_progress: self.cli.no_progress,
            run_id: self.cli.run_id,
            output: self.cli.output,
            summary_path,
        })
    }
}
