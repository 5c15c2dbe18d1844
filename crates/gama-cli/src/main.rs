use clap::Parser;
use gama_cli::cli::{Cli, Commands};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::simulate::SimulateArgs;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
    }

    let result = match &cli.command {
        Commands::Validate { case, config } => commands::validate::handle(case, config.as_deref()),
        Commands::Islands { case, outages } => commands::islands::handle(case, outages),
        Commands::Simulate {
            case,
            config,
            out,
            steps,
            solver,
            contingencies,
        } => commands::simulate::handle(SimulateArgs {
            case,
            config: config.as_deref(),
            out,
            steps: *steps,
            solver: *solver,
            contingencies: *contingencies,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
