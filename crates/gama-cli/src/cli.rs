use clap::{Parser, Subcommand};
use gama_lp::SolverKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gama",
    author,
    version,
    about = "Grid and market dispatch simulation",
    long_about = None
)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a case file and print grid statistics
    Validate {
        /// Case file (JSON with `grid` and `profiles`)
        case: PathBuf,
        /// Also check a run configuration against the case
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List AC islands and their angle reference nodes
    Islands {
        case: PathBuf,
        /// Branch to take out of service (repeatable)
        #[arg(long = "outage", value_name = "ID")]
        outages: Vec<String>,
    },
    /// Run the multi-period dispatch and write results
    Simulate {
        case: PathBuf,
        /// Run configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for result tables and the run manifest
        #[arg(long, default_value = "gama-out")]
        out: PathBuf,
        /// Number of steps, overriding the configuration
        #[arg(long)]
        steps: Option<usize>,
        /// Primary solver, overriding the configuration
        #[arg(long, value_name = "NAME")]
        solver: Option<SolverKind>,
        /// Also run the configured contingencies, each into its own subdirectory
        #[arg(long)]
        contingencies: bool,
    },
}
