use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::io::{BufRead, Read, Write};
use std::path::Path;
use swarm_instruments::MetricBucket;

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the test definition that was run
    pub test_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The planned duration of all load phases, in seconds
    pub planned_duration: u64,
    /// The load phases as written in the test definition
    pub phases: serde_json::Value,
    /// The number of workers the load was divided across, after idle workers were removed.
    pub worker_count: usize,
    /// The number of workers that exited cleanly with a final report
    ///
    /// If workers crash or the run is interrupted then this will be less than
    /// [RunSummary::worker_count].
    pub worker_end_count: usize,
    /// The exit code the run finished with
    pub exit_code: i32,
    /// The version of Swarm that was used for this run
    pub swarm_version: String,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        test_name: String,
        started_at: i64,
        planned_duration: u64,
        phases: serde_json::Value,
        worker_count: usize,
        swarm_version: String,
    ) -> Self {
        Self {
            run_id,
            test_name,
            started_at,
            planned_duration,
            phases,
            worker_count,
            worker_end_count: 0,
            exit_code: 0,
            swarm_version,
        }
    }

    /// Set the worker end count
    pub fn set_worker_end_count(&mut self, worker_end_count: usize) {
        self.worker_end_count = worker_end_count;
    }

    pub fn set_exit_code(&mut self, exit_code: i32) {
        self.exit_code = exit_code;
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint identifies the configuration used for the run so that runs of the same
    /// configuration can be compared. It uses the
    ///     - Test name
    ///     - Load phases
    ///     - Worker count
    ///     - Swarm version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.test_name.as_bytes());
        // serde_json::Value objects are ordered maps so this is stable.
        Digest::update(&mut hasher, self.phases.to_string().as_bytes());
        Digest::update(&mut hasher, (self.worker_count as u64).to_le_bytes());
        Digest::update(&mut hasher, self.swarm_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// The full output of a run: the aggregate of every worker's final report plus each flushed
/// period in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_summary: RunSummary,
    pub aggregate: MetricBucket,
    pub intermediate: Vec<MetricBucket>,
}

/// Write the full report as pretty printed JSON.
pub fn store_run_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

/// Load a report written by [store_run_report].
pub fn load_run_report<R: Read>(reader: R) -> anyhow::Result<RunReport> {
    let reader = std::io::BufReader::new(reader);
    Ok(serde_json::from_reader(reader)?)
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: &Path) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        runs.push(serde_json::from_str(&line)?);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(run_id: &str, workers: usize) -> RunSummary {
        RunSummary::new(
            run_id.to_string(),
            "checkout".to_string(),
            1_700_000_000,
            90,
            serde_json::json!([{ "duration": 60, "arrivalRate": 10 }, { "pause": 30 }]),
            workers,
            "0.1.0".to_string(),
        )
    }

    #[test]
    fn fingerprint_ignores_run_identity() {
        let a = summary("a", 4);
        let mut b = summary("b", 4);
        b.set_worker_end_count(3);
        b.set_exit_code(1);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), summary("c", 5).fingerprint());
    }

    #[test]
    fn appended_summaries_load_in_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run_summary.jsonl");

        append_run_summary(&summary("first", 2), &path)?;
        append_run_summary(&summary("second", 2), &path)?;

        let runs = load_summary_runs(&path)?;
        assert_eq!(
            vec!["first".to_string(), "second".to_string()],
            runs.into_iter().map(|r| r.run_id).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn stored_report_round_trips_through_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.json");

        let mut aggregate = MetricBucket::new(0, 1_000);
        aggregate.incr("vusers.created", 5, 10);
        aggregate.record("connect.duration_ms", 7, 10);
        aggregate.summarize();

        let report = RunReport {
            run_summary: summary("r", 1),
            aggregate,
            intermediate: vec![],
        };
        store_run_report(&report, &path)?;

        let loaded = load_run_report(std::fs::File::open(&path)?)?;
        assert_eq!(report.run_summary, loaded.run_summary);
        assert_eq!(5, loaded.aggregate.counter("vusers.created"));
        assert_eq!(
            report.aggregate.summaries,
            loaded.aggregate.summaries
        );
        Ok(())
    }
}
