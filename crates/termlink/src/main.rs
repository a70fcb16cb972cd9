mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "termlink", &mut std::io::stdout());
            Ok(())
        }

        // Profile management never connects.
        Command::Profile(args) => commands::profile::handle(args.command, &cli.global),

        cmd => {
            let resolved = config::resolve(&cli.global)?;
            let dispatcher = config::build_dispatcher(&resolved, &cli.global)?;

            tracing::debug!(command = ?cmd, profile = %resolved.name, "dispatching command");
            let result = commands::dispatch(cmd, &dispatcher, &cli.global).await;
            dispatcher.manager().disconnect(None);
            result
        }
    }
}
