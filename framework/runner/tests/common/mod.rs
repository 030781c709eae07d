use std::path::Path;
use std::time::Duration;

use swarm_runner::prelude::{
    OrchestratorConfig, PlatformOpt, ReporterOpt, SwarmScenarioCli, TestDefinition, WorkerOptions,
};
use swarm_summary_model::{load_run_report, RunReport};

pub fn sample_cli_cfg(dir: &Path) -> SwarmScenarioCli {
    SwarmScenarioCli {
        definition: None,
        workers: Some(2),
        replicas: None,
        platform: PlatformOpt::Local,
        period: 1,
        output: Some(dir.join("report.json")),
        reporter: ReporterOpt::Noop,
        no_progress: true,
        run_id: None,
        summary_path: Some(dir.join("run_summary.jsonl")),
    }
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        metrics_flush_interval: Duration::from_millis(100),
        error_flush_interval: Duration::from_millis(100),
        completion_check_interval: Duration::from_millis(100),
        online_timeout: Duration::from_secs(10),
        ready_timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_secs(5),
        worker_options: WorkerOptions {
            period: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
        },
    }
}

pub fn definition(yaml: &str) -> TestDefinition {
    TestDefinition::from_yaml(yaml).unwrap()
}

pub fn read_report(dir: &Path) -> RunReport {
    load_run_report(std::fs::File::open(dir.join("report.json")).unwrap()).unwrap()
}
