//! CLI command handling
//!
//! Dispatches CLI commands to the harness and formats output.

use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, ServiceEndpoint};
use crate::common::Result;
use crate::harness::{plan, probe, Orchestrator, ProbeOptions, RunPlan, RunState, Scenario};

/// Dispatch a CLI command
///
/// Returns `Ok(false)` when a run halted; errors are setup problems that kept
/// the run from starting.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            config,
            plan,
            only,
            report,
        } => run(config, plan, only, report).await,

        Commands::List => {
            println!("Scenarios (run order):");
            for scenario in Scenario::ALL {
                println!(
                    "  {:<18} {}",
                    scenario.label().cyan(),
                    scenario.description().dimmed()
                );
            }
            Ok(true)
        }

        Commands::Probe {
            host,
            port,
            timeout,
        } => {
            let endpoint = ServiceEndpoint { host, port };
            let opts = ProbeOptions {
                timeout: Duration::from_secs(timeout),
                ..ProbeOptions::default()
            };

            probe::wait_ready(&endpoint, &opts).await?;
            println!("{} {} is accepting connections", "✓".green(), endpoint);
            Ok(true)
        }
    }
}

async fn run(
    config: Option<PathBuf>,
    plan_path: Option<PathBuf>,
    only: Vec<String>,
    report_path: Option<PathBuf>,
) -> Result<bool> {
    let config = match &config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let run_plan = plan_path.as_deref().map(RunPlan::load).transpose()?;
    // Labels are validated before anything is spawned
    let scenarios = plan::select(run_plan.as_ref(), &only)?;

    let mut orchestrator = Orchestrator::new(&config)?;
    if let Some(account) = run_plan.and_then(|p| p.account) {
        orchestrator = orchestrator.with_account(account);
    }

    println!(
        "\n{} {} scenario(s) against {}",
        "Running".blue().bold(),
        scenarios.len(),
        orchestrator.endpoint().to_string().white().bold()
    );

    let mut state = RunState::new();
    let report = orchestrator.run(&scenarios, &mut state).await;
    report.print_summary();

    if let Some(path) = report_path {
        report.write(&path)?;
    }

    Ok(report.passed())
}
