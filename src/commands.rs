//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenarios against fresh service instances, stopping at the first failure
    Run {
        /// Configuration file (default: platform config dir, then built-in defaults)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// YAML plan with an explicit scenario order and/or fixture account
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Only run these scenarios (repeatable), keeping the run order
        /// Example: --only register --only login
        #[arg(long)]
        only: Vec<String>,

        /// Write a JSON report of the run to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List scenarios in run order
    #[command(alias = "ls")]
    List,

    /// Wait until host:port accepts a TCP connection
    Probe {
        /// Host to connect to
        host: String,

        /// Port to connect to
        port: u16,

        /// Give up after this many seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
}
