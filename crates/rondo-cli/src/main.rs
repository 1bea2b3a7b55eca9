//! Command-line runner for rondo
//!
//! Runs a built-in scenario once, as a seeded simulation, or under exhaustive
//! choice-point exploration, and prints the verification report.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod handlers;

use handlers::run::{ModeArg, RunArgs};

#[derive(Parser)]
#[command(name = "rondo")]
#[command(about = "Rondo - cooperating automata under a single arbiter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (.toml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario
    Run {
        /// Scenario name, see `rondo scenarios`
        scenario: String,

        /// Verification mode
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Runs for simulation, run budget for model checking
        #[arg(short, long)]
        runs: Option<u64>,

        /// Selection policy
        #[arg(short, long)]
        policy: Option<String>,

        /// Simulation time-to-live
        #[arg(short, long)]
        ttl: Option<u64>,

        /// Base seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the built-in scenarios
    Scenarios,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();

    match dispatch(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!(error = %err, "rondo failed");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the command found nothing to complain about
fn dispatch(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Run {
            scenario,
            mode,
            runs,
            policy,
            ttl,
            seed,
            json,
        } => handlers::run::handle_run(RunArgs {
            scenario,
            config: cli.config,
            mode,
            runs,
            policy,
            ttl,
            seed,
            json,
        }),
        Commands::Scenarios => {
            handlers::scenarios::handle_list();
            Ok(true)
        }
    }
}
