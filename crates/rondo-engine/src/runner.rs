//! Execution of one run

use crate::controller::{Controller, TerminationReason};
use crate::status::Status;
use rondo_core::{EngineError, MachineKey, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::thread;

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Run number within the session
    pub run: u64,
    /// Why the run ended
    pub reason: TerminationReason,
    /// Virtual time at the end
    pub clock: u64,
    /// Event time at the end
    pub event_clock: u64,
    /// Candidate the first decision was forced to, for replays
    pub forced: Option<MachineKey>,
    /// Machines admitted, in order
    pub admissions: Vec<MachineKey>,
    /// Critical-section entries
    pub entries: u64,
    /// Machines that terminated
    pub terminated: u64,
    /// Controller decisions
    pub decisions: u64,
    /// Highest number of simultaneous holders observed
    pub max_holders: usize,
    /// Choice points recorded during the run
    pub choice_points: u64,
    /// Final-state invariant violations reported by the scenario
    pub violations: Vec<String>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: {} at clock {} ({} entries, {} terminated",
            self.run, self.reason, self.clock, self.entries, self.terminated
        )?;
        if let Some(forced) = &self.forced {
            write!(f, ", replaying {forced}")?;
        }
        if !self.violations.is_empty() {
            write!(f, ", {} violations", self.violations.len())?;
        }
        f.write_str(")")
    }
}

/// Drives one [`Status`] from its first decision to full shutdown
#[derive(Debug)]
pub struct Runner {
    status: Arc<Status>,
}

impl Runner {
    /// Runner for `status`
    pub fn new(status: Arc<Status>) -> Self {
        Self { status }
    }

    /// Launch every machine, run the controller to termination, wait until all
    /// machines have unwound, and report. A fatal error recorded during the
    /// run is returned as `Err`.
    pub fn run(self) -> Result<RunReport> {
        let status = self.status;
        let session = Arc::clone(status.session());
        let run = session.begin_run();
        let forced = session.with_vars(|vars| {
            if vars.recovering {
                vars.chosen.clone()
            } else {
                None
            }
        });
        tracing::info!(
            run,
            policy = ?status.config().policy,
            machines = status.live_count(),
            clock = status.now(),
            "run starting"
        );

        if let Err(err) = status.go_live() {
            abandon(&status);
            return Err(err);
        }
        status.kick("runner");

        let controller = Controller::new(Arc::clone(&status));
        let spawned = thread::Builder::new()
            .name("rondo-controller".to_string())
            .spawn(move || controller.run());
        let reason = match spawned.map(thread::JoinHandle::join) {
            Ok(Ok(reason)) => reason,
            Ok(Err(_)) => {
                abandon(&status);
                return Err(EngineError::internal("controller thread panicked"));
            }
            Err(e) => {
                abandon(&status);
                return Err(EngineError::internal(format!(
                    "failed to spawn controller: {e}"
                )));
            }
        };

        status.wind_down();
        if let Some(err) = status.fatal() {
            tracing::error!(run, error = %err, "run aborted");
            return Err(err);
        }

        let stats = status.stats();
        let report = RunReport {
            run,
            reason,
            clock: status.now(),
            event_clock: session.clocks().event_now(),
            forced,
            admissions: stats.admissions,
            entries: stats.entries,
            terminated: stats.terminated,
            decisions: stats.decisions,
            max_holders: stats.max_holders,
            choice_points: stats.choice_points,
            violations: Vec::new(),
        };
        tracing::info!(run, %reason, clock = report.clock, entries = report.entries, "run finished");
        Ok(report)
    }
}

/// Cancel everything and wait for the machines when the controller never ran
fn abandon(status: &Status) {
    for control in status.begin_stopping() {
        control.cancel("runner");
    }
    status.wind_down();
}
