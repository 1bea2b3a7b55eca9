//! Verification modes and the replay driver
//!
//! An [`Explorer`] runs a [`Scenario`] once, repeatedly with different seeds,
//! or exhaustively: after the initial run it keeps taking candidates from the
//! recorded choice points and replays each from its snapshot until none are
//! left or the run budget is spent.

use crate::runner::{RunReport, Runner};
use crate::session::Session;
use crate::status::Status;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rondo_core::{
    ConfigValidation, EngineConfig, MetaContext, NoopSlotProcessor, NullMeta, Result,
    SlotProcessor, VerificationMode,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A system under verification: automata, initial machines and final checks
pub trait Scenario: Send + Sync {
    /// Short name used on the command line
    fn name(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str;

    /// Initial domain state
    fn meta(&self) -> Box<dyn MetaContext> {
        Box::new(NullMeta)
    }

    /// Processor for scheduled work slots
    fn slot_processor(&self) -> Arc<dyn SlotProcessor> {
        Arc::new(NoopSlotProcessor)
    }

    /// Register automata, start machines and schedule work
    fn setup(&self, status: &Arc<Status>) -> Result<()>;

    /// Invariant violations in the final state of a run
    fn check(&self, _status: &Status) -> Vec<String> {
        Vec::new()
    }
}

/// Outcome of a verification session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    /// Scenario name
    pub scenario: String,
    /// Mode the session ran in
    pub mode: VerificationMode,
    /// Every run, in execution order
    pub runs: Vec<RunReport>,
    /// Choice points left unexplored when the run budget ran out
    pub unexplored: usize,
}

impl VerificationReport {
    /// Whether every recorded branch was explored
    pub fn exhausted(&self) -> bool {
        self.unexplored == 0
    }

    /// All violations with the run that found them
    pub fn violations(&self) -> impl Iterator<Item = (u64, &str)> {
        self.runs.iter().flat_map(|report| {
            report
                .violations
                .iter()
                .map(move |violation| (report.run, violation.as_str()))
        })
    }

    /// Whether no run reported a violation
    pub fn is_clean(&self) -> bool {
        self.violations().next().is_none()
    }

    /// Critical-section entries over all runs
    pub fn total_entries(&self) -> u64 {
        self.runs.iter().map(|report| report.entries).sum()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} [{}]: {} runs, {} entries",
            self.scenario,
            self.mode,
            self.runs.len(),
            self.total_entries()
        )?;
        for report in &self.runs {
            writeln!(f, "  {report}")?;
        }
        for (run, violation) in self.violations() {
            writeln!(f, "  violation in run {run}: {violation}")?;
        }
        if !self.exhausted() {
            writeln!(f, "  {} choice points left unexplored", self.unexplored)?;
        }
        Ok(())
    }
}

/// Runs a scenario under the configured verification mode
pub struct Explorer<'a> {
    config: EngineConfig,
    scenario: &'a dyn Scenario,
    session: Arc<Session>,
    rng: ChaCha8Rng,
}

impl<'a> Explorer<'a> {
    /// Explorer for `scenario`
    pub fn new(config: EngineConfig, scenario: &'a dyn Scenario) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            scenario,
            session: Arc::new(Session::new()),
        })
    }

    /// Session shared by every run
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Fresh run state for `seed` with the scenario set up, clocks at zero
    pub fn prepare(&self, seed: u64) -> Result<Arc<Status>> {
        self.session.clocks().reset();
        let config = self.config.clone().with_seed(seed);
        let status = Status::new(
            config,
            Arc::clone(&self.session),
            self.scenario.meta(),
            self.scenario.slot_processor(),
        )?;
        self.scenario.setup(&status)?;
        Ok(status)
    }

    /// Run `status` to completion and apply the scenario's final checks
    pub fn execute(&self, status: &Arc<Status>) -> Result<RunReport> {
        let mut report = Runner::new(Arc::clone(status)).run()?;
        report.violations = self.scenario.check(status);
        for violation in &report.violations {
            tracing::warn!(run = report.run, violation, "invariant violated");
        }
        Ok(report)
    }

    /// Run the whole session
    pub fn run(&mut self) -> Result<VerificationReport> {
        self.session.reset();
        tracing::info!(scenario = self.scenario.name(), mode = %self.config.mode, "verification starting");
        let result = match self.config.mode {
            VerificationMode::SingleRun => self.simulate(1),
            VerificationMode::Simulation { runs } => self.simulate(u64::from(runs)),
            VerificationMode::ModelChecking { max_runs } => self.model_check(max_runs),
        };
        // Snapshots reference the session; drop whatever is left unexplored
        let unexplored = self.session.with_vars(|vars| {
            let left = vars.choice_points.len();
            vars.choice_points.clear();
            left
        });
        let runs = result?;

        let report = VerificationReport {
            scenario: self.scenario.name().to_string(),
            mode: self.config.mode,
            runs,
            unexplored,
        };
        tracing::info!(
            scenario = %report.scenario,
            runs = report.runs.len(),
            clean = report.is_clean(),
            "verification finished"
        );
        Ok(report)
    }

    fn simulate(&self, runs: u64) -> Result<Vec<RunReport>> {
        (0..runs)
            .map(|i| {
                let status = self.prepare(self.config.seed.wrapping_add(i))?;
                self.execute(&status)
            })
            .collect()
    }

    fn model_check(&mut self, max_runs: Option<u64>) -> Result<Vec<RunReport>> {
        let initial = self.prepare(self.config.seed)?;
        let mut reports = vec![self.execute(&initial)?];

        while max_runs.map_or(true, |max| (reports.len() as u64) < max) {
            let criteria = self.config.model_checking;
            let rng = &mut self.rng;
            let Some(replay) = self
                .session
                .with_vars(|vars| vars.next_replay(criteria, rng))?
            else {
                break;
            };
            self.session.prepare_replay(&replay);
            let status = replay.snapshot.clone_for_new_run();
            reports.push(self.execute(&status)?);
        }
        Ok(reports)
    }
}
