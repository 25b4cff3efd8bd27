use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use humantime::parse_duration;

use crate::config::StressConfig;
use crate::workloads::WorkloadsConfig;

mod config;
mod logging;
mod stresstest;
mod workloads;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = parse_duration)]
    duration: Duration,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;
    workloads.validate()?;

    let config = StressConfig::get(cli.config.as_deref())?;

    logging::init_logging(&config.logging);
    if let Some(statsd) = &config.metrics.statsd {
        readcache::metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    stresstest::perform_stresstest(&config, workloads, cli.duration)
}
