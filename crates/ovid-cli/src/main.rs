//! The `ovid` binary entry point.

use std::process::ExitCode;

use clap::Parser;

use ovid_cli::{commands, Cli, Commands};
use ovid_core::observability::init_logging;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_format = match &cli.command {
        Some(Commands::Leader(args)) => args.workload.log,
        Some(Commands::Follower(args)) => args.log,
        None => cli.workload.log,
    };
    init_logging(log_format.into());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to build the async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match &cli.command {
            Some(Commands::Leader(args)) => commands::leader::execute(args).await,
            Some(Commands::Follower(args)) => commands::follower::execute(args).await,
            None => commands::workload::execute(&cli).await,
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = format!("{error:#}"), "ovid failed");
            ExitCode::FAILURE
        }
    }
}
