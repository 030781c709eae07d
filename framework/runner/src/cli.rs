use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct SwarmScenarioCli {
    /// Path to the YAML test definition describing the load phases, payload and variables
    #[clap(short, long)]
    pub definition: Option<PathBuf>,

    /// The number of workers to divide the load across.
    ///
    /// Defaults to the number of available CPUs. Workers that would be left with nothing to do are
    /// not started, so fewer workers than requested may run.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Run this many full copies of the test instead of dividing the load between workers
    #[clap(long, conflicts_with = "workers")]
    pub replicas: Option<usize>,

    /// Where the workers run
    #[arg(long, value_enum, default_value_t = PlatformOpt::Local)]
    pub platform: PlatformOpt,

    /// Length of a metrics reporting period, in seconds
    #[clap(long, default_value = "10")]
    pub period: u64,

    /// Write the final JSON report to this file
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// How to report metrics while the test runs and when it finishes
    #[arg(long, value_enum, default_value_t = ReporterOpt::Summary)]
    pub reporter: ReporterOpt,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Identifier for this run, generated if not given
    #[clap(long)]
    pub run_id: Option<String>,

    /// File to append the run summary to.
    ///
    /// Falls back to the `RUN_SUMMARY_PATH` environment variable and then `run_summary.jsonl`.
    #[clap(long)]
    pub summary_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ReporterOpt {
    /// Print tables of each period's metrics and a summary at the end
    #[default]
    Summary,
    /// Do not report metrics
    Noop,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PlatformOpt {
    /// One thread per worker in this process
    #[default]
    Local,
}
