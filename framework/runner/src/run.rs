use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nanoid::nanoid;
use parking_lot::Mutex;
use swarm_instruments::report::{NoopReportCollector, ReportCollector, SummaryReportCollector};
use swarm_summary_model::{append_run_summary, store_run_report, RunReport, RunSummary};

use crate::cli::{PlatformOpt, ReporterOpt};
use crate::context::RunnerContext;
use crate::definition::{ScenarioDefinitionBuilder, SplitMode};
use crate::divide::{divide_phases, replicate_phases};
use crate::executor::Executor;
use crate::monitor::start_monitor;
use crate::orchestrator::Orchestrator;
use crate::platform::LocalPlatform;
use crate::progress::start_progress;
use crate::shutdown::{start_shutdown_listener, ShutdownHandle};

/// Run a scenario to completion and return the exit code the process should use.
///
/// Errors are returned for anything that stops the run from starting, such as an invalid test
/// definition, a failing setup hook or workers that never come online. Once the load is running
/// the run always completes, possibly with a partial report if it is interrupted.
pub fn run(definition: ScenarioDefinitionBuilder) -> anyhow::Result<i32> {
    let definition = definition.build()?;

    log::info!("Running test: {}", definition.name);

    let run_id = definition.run_id.clone().unwrap_or_else(|| nanoid!());
    let started_at = chrono::Utc::now().timestamp();

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime)?;
    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));
    let mut runner_context = RunnerContext::new(
        run_id.clone(),
        executor.clone(),
        shutdown_handle.clone(),
        definition.test.variables.clone(),
    );

    if let Some(setup_fn) = definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let plans = match definition.split {
        SplitMode::Divide(workers) => divide_phases(
            &definition.test.phases,
            workers,
            &definition.payload,
            &definition.test.variables,
        ),
        SplitMode::Replicate(count) => replicate_phases(
            &definition.test.phases,
            count,
            &definition.payload,
            &definition.test.variables,
        ),
    };
    if plans.is_empty() {
        anyhow::bail!("Nothing to run, no load phase generates any virtual users");
    }
    let worker_count = plans.len();
    let planned_duration_s = plans
        .iter()
        .map(|p| p.planned_duration_s())
        .max()
        .unwrap_or_default();

    let platform = match definition.platform {
        PlatformOpt::Local => LocalPlatform::new(definition.vu_behaviour, worker_count),
    };
    let mut orchestrator = Orchestrator::new(
        platform,
        definition.orchestrator_config.clone(),
        definition.test.phases.clone(),
        shutdown_handle.new_listener(),
    );

    let collector: Box<dyn ReportCollector> = match definition.reporter {
        ReporterOpt::Summary => Box::new(SummaryReportCollector::new()),
        ReporterOpt::Noop => Box::new(NoopReportCollector),
    };
    let reporter = Arc::new(Mutex::new(collector));
    {
        let bus = orchestrator.bus_mut();
        let period_reporter = reporter.clone();
        bus.on_stats(move |bucket| period_reporter.lock().add_period(bucket));
        let final_reporter = reporter.clone();
        bus.on_done(move |aggregate| final_reporter.lock().finalize(aggregate));
    }

    // The progress bar and monitor keep going through a graceful shutdown until the coordinator returns.
    let helpers_shutdown = ShutdownHandle::new();
    if !definition.no_progress && planned_duration_s > 0 {
        start_progress(
            Duration::from_secs(planned_duration_s),
            helpers_shutdown.new_listener(),
        )?;
    }
    start_monitor(helpers_shutdown.new_listener())?;

    log::info!("Starting {worker_count} workers for run {run_id}");
    let outcome = executor.block_on(orchestrator.run(plans, runner_context.variables().clone()));

    helpers_shutdown.shutdown();

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting to happen
        // cleanly. The hook is documented as 'best effort'
        if let Err(e) = teardown_fn(&runner_context) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    let outcome = outcome?;
    if outcome.interrupted {
        log::warn!("Run {run_id} was interrupted, the report may be incomplete");
    }

    let mut run_summary = RunSummary::new(
        run_id,
        definition.name,
        started_at,
        definition.test.planned_duration_s(),
        serde_json::to_value(&definition.test.phases)?,
        worker_count,
        env!("CARGO_PKG_VERSION").to_string(),
    );
    run_summary.set_worker_end_count(outcome.clean_exits);
    run_summary.set_exit_code(outcome.exit_code);
    log::info!("Run fingerprint: {}", run_summary.fingerprint());

    if let Err(e) = append_run_summary(&run_summary, &definition.summary_path) {
        log::warn!(
            "Failed to write run summary to {}: {e:?}",
            definition.summary_path.display()
        );
    }

    if let Some(output) = &definition.output {
        let report = RunReport {
            run_summary,
            aggregate: outcome.aggregate,
            intermediate: outcome.intermediate,
        };
        store_run_report(&report, output)
            .with_context(|| format!("Failed to write report to {}", output.display()))?;
        log::info!("Report written to {}", output.display());
    }

    Ok(outcome.exit_code)
}
