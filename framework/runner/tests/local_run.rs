mod common;

use common::{definition, fast_config, read_report, sample_cli_cfg};
use pretty_assertions::assert_eq;
use swarm_runner::prelude::{run, HookResult, ScenarioDefinitionBuilder, VuContext};
use swarm_summary_model::load_summary_runs;

fn counting_behaviour(ctx: &mut VuContext) -> HookResult {
    ctx.incr(&format!("worker.{}", ctx.worker()), 1);
    ctx.record("work_ms", 1);
    Ok(())
}

#[test]
fn divided_load_adds_up() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = ScenarioDefinitionBuilder::new("divided_load_adds_up", sample_cli_cfg(dir.path()))
        .with_test_definition(definition(
            "name: divided\nphases: [{ duration: 2, arrivalRate: 5, name: steady }]",
        ))
        .with_orchestrator_config(fast_config())
        .use_vu_behaviour(counting_behaviour);

    assert_eq!(0, run(scenario).unwrap());

    let report = read_report(dir.path());
    assert_eq!("divided", report.run_summary.test_name);
    assert_eq!(2, report.run_summary.worker_count);
    assert_eq!(2, report.run_summary.worker_end_count);
    assert_eq!(2, report.run_summary.planned_duration);

    // 5 per second split as 3 and 2 over two seconds.
    assert_eq!(10, report.aggregate.counter("vusers.created"));
    assert_eq!(10, report.aggregate.counter("vusers.completed"));
    assert_eq!(6, report.aggregate.counter("worker.1"));
    assert_eq!(4, report.aggregate.counter("worker.2"));
    assert_eq!(10, report.aggregate.summaries["work_ms"].count);

    assert!(!report.intermediate.is_empty());
    assert!(report
        .intermediate
        .windows(2)
        .all(|w| w[0].period < w[1].period));
    let intermediate_total: u64 = report
        .intermediate
        .iter()
        .map(|b| b.counter("vusers.created"))
        .sum();
    assert_eq!(10, intermediate_total);

    let runs = load_summary_runs(&dir.path().join("run_summary.jsonl")).unwrap();
    assert_eq!(1, runs.len());
    assert_eq!(report.run_summary, runs[0]);
}

#[test]
fn payload_rows_are_partitioned_between_workers() {
    fn vu_behaviour(ctx: &mut VuContext) -> HookResult {
        let user = ctx
            .payload_row("users")
            .and_then(|row| row.first().cloned())
            .ok_or_else(|| anyhow::anyhow!("No payload"))?;
        ctx.incr(&format!("user.{user}"), 1);
        Ok(())
    }

    let dir = tempfile::tempdir().unwrap();
    let users = dir.path().join("users.csv");
    std::fs::write(&users, "name\na\nb\nc\nd\n").unwrap();

    let scenario = ScenarioDefinitionBuilder::new(
        "payload_rows_are_partitioned_between_workers",
        sample_cli_cfg(dir.path()),
    )
    .with_test_definition(definition(&format!(
        "phases: [{{ duration: 2, arrivalRate: 2 }}]\npayload: [{{ name: users, path: {}, skipHeader: true }}]",
        users.display()
    )))
    .with_orchestrator_config(fast_config())
    .use_vu_behaviour(vu_behaviour);

    assert_eq!(0, run(scenario).unwrap());

    let aggregate = read_report(dir.path()).aggregate;
    for user in ["a", "b", "c", "d"] {
        assert_eq!(1, aggregate.counter(&format!("user.{user}")), "user {user}");
    }
}

#[test]
fn replicas_each_run_the_whole_test() {
    let dir = tempfile::tempdir().unwrap();
    let mut cli = sample_cli_cfg(dir.path());
    cli.workers = None;
    cli.replicas = Some(2);

    let scenario = ScenarioDefinitionBuilder::new("replicas_each_run_the_whole_test", cli)
        .with_test_definition(definition("phases: [{ duration: 1, arrivalCount: 3 }]"))
        .with_orchestrator_config(fast_config())
        .use_vu_behaviour(counting_behaviour);

    assert_eq!(0, run(scenario).unwrap());

    let report = read_report(dir.path());
    assert_eq!(2, report.run_summary.worker_count);
    assert_eq!(6, report.aggregate.counter("vusers.created"));
    assert_eq!(3, report.aggregate.counter("worker.1"));
    assert_eq!(3, report.aggregate.counter("worker.2"));
}

#[test]
fn max_vusers_caps_concurrency() {
    fn slow_behaviour(_ctx: &mut VuContext) -> HookResult {
        std::thread::sleep(std::time::Duration::from_millis(1500));
        Ok(())
    }

    let dir = tempfile::tempdir().unwrap();
    let mut cli = sample_cli_cfg(dir.path());
    cli.workers = Some(1);

    let scenario = ScenarioDefinitionBuilder::new("max_vusers_caps_concurrency", cli)
        .with_test_definition(definition(
            "phases: [{ duration: 1, arrivalRate: 4, maxVusers: 2 }]",
        ))
        .with_orchestrator_config(fast_config())
        .use_vu_behaviour(slow_behaviour);

    assert_eq!(0, run(scenario).unwrap());

    let aggregate = read_report(dir.path()).aggregate;
    assert_eq!(2, aggregate.counter("vusers.created"));
    assert_eq!(2, aggregate.counter("vusers.skipped"));
}

#[test]
fn stuck_virtual_user_does_not_hold_up_the_run() {
    fn stuck_behaviour(_ctx: &mut VuContext) -> HookResult {
        std::thread::sleep(std::time::Duration::from_secs(20));
        Ok(())
    }

    let dir = tempfile::tempdir().unwrap();
    let mut cli = sample_cli_cfg(dir.path());
    cli.workers = Some(1);
    let mut config = fast_config();
    config.worker_options.drain_timeout = std::time::Duration::from_secs(1);

    let scenario = ScenarioDefinitionBuilder::new("stuck_virtual_user_does_not_hold_up_the_run", cli)
        .with_test_definition(definition("phases: [{ duration: 1, arrivalCount: 1 }]"))
        .with_orchestrator_config(config)
        .use_vu_behaviour(stuck_behaviour);

    let started = std::time::Instant::now();
    assert_eq!(0, run(scenario).unwrap());
    let elapsed = started.elapsed();
    assert!(elapsed < std::time::Duration::from_secs(8), "run took {elapsed:?}");

    let report = read_report(dir.path());
    assert_eq!(1, report.run_summary.worker_end_count);
    assert_eq!(1, report.aggregate.counter("vusers.created"));
    assert_eq!(0, report.aggregate.counter("vusers.completed"));
}
