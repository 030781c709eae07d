use crate::cli::SwarmScenarioCli;
use clap::Parser;

/// Initialise logging and parse the command line for a scenario.
pub fn init() -> SwarmScenarioCli {
    env_logger::init();

    SwarmScenarioCli::parse()
}
