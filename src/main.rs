//! auth-e2e - end-to-end harness for the authentication service
//!
//! Launches a fresh service instance per scenario, drives it over HTTP,
//! checks withheld tokens in its store, and stops at the first failure.

use clap::Parser;
use auth_e2e::{cli, commands, common::logging};
use commands::Commands;

#[derive(Parser)]
#[command(name = "auth-e2e", about = "End-to-end harness for the authentication service")]
#[command(version, long_about = None)]
struct Cli {
    /// Debug-level diagnostics on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(path) = logging::init_cli(cli.verbose) {
        tracing::debug!(path = %path.display(), "Logging to file");
    }

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
