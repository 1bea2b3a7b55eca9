//! `rondo run`

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use rondo_core::{ConfigLoad, EngineConfig, SelectionPolicy, VerificationMode};
use rondo_engine::Explorer;
use std::path::PathBuf;

/// Verification mode as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// One run
    Single,
    /// Independent seeded runs
    Simulate,
    /// Exhaustive choice-point exploration
    Check,
}

/// Options of `rondo run`
#[derive(Debug)]
pub struct RunArgs {
    pub scenario: String,
    pub config: Option<PathBuf>,
    pub mode: Option<ModeArg>,
    pub runs: Option<u64>,
    pub policy: Option<String>,
    pub ttl: Option<u64>,
    pub seed: Option<u64>,
    pub json: bool,
}

/// Layer defaults, the config file, `RONDO_*` variables and flags, in that order
fn resolve_config(args: &RunArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.merge_with_env()?;

    if let Some(mode) = args.mode {
        config.mode = match mode {
            ModeArg::Single => VerificationMode::SingleRun,
            ModeArg::Simulate => {
                let runs = args.runs.unwrap_or(10);
                VerificationMode::Simulation {
                    runs: u32::try_from(runs).context("too many simulation runs")?,
                }
            }
            ModeArg::Check => VerificationMode::ModelChecking { max_runs: args.runs },
        };
    }
    if let Some(policy) = &args.policy {
        config.policy = policy.parse::<SelectionPolicy>()?;
    }
    if let Some(ttl) = args.ttl {
        config.ttl = ttl;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(config)
}

/// Run a scenario and print its report; returns whether it was clean
pub fn handle_run(args: RunArgs) -> Result<bool> {
    let scenario = rondo_testkit::scenario(&args.scenario)
        .ok_or_else(|| anyhow!("unknown scenario '{}'", args.scenario))?;
    let config = resolve_config(&args)?;
    tracing::info!(
        scenario = scenario.name(),
        mode = %config.mode,
        policy = %config.policy,
        ttl = config.ttl,
        "starting"
    );

    let report = Explorer::new(config, scenario.as_ref())?.run()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(report.is_clean())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(mode: Option<ModeArg>, runs: Option<u64>) -> RunArgs {
        RunArgs {
            scenario: "alternation".to_string(),
            config: None,
            mode,
            runs,
            policy: Some("min-issue-time".to_string()),
            ttl: Some(30),
            seed: None,
            json: false,
        }
    }

    #[test]
    fn flags_override_defaults() {
        let config = resolve_config(&args(Some(ModeArg::Check), Some(5))).unwrap();
        assert_eq!(config.mode, VerificationMode::ModelChecking { max_runs: Some(5) });
        assert_eq!(config.policy, SelectionPolicy::MinIssueTime);
        assert_eq!(config.ttl, 30);
    }

    #[test]
    fn simulation_defaults_to_ten_runs() {
        let config = resolve_config(&args(Some(ModeArg::Simulate), None)).unwrap();
        assert_eq!(config.mode, VerificationMode::Simulation { runs: 10 });
    }

    #[test]
    fn unknown_scenarios_are_rejected() {
        let mut args = args(None, None);
        args.scenario = "nope".to_string();
        assert!(handle_run(args).is_err());
    }
}
