//! Engine session
//!
//! State that outlives a single run: the clocks, the model-checking
//! bookkeeping and the run counter. One session is threaded explicitly through
//! every run of a verification; [`Session::reset`] starts it over.

use crate::choice::{ModelCheckingVars, Replay};
use parking_lot::Mutex;
use rondo_core::{Clocks, MachineKey};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cross-run state of a verification session
#[derive(Debug, Default)]
pub struct Session {
    clocks: Clocks,
    vars: Mutex<ModelCheckingVars>,
    runs: AtomicU64,
}

impl Session {
    /// Fresh session
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual and event clocks
    pub fn clocks(&self) -> &Clocks {
        &self.clocks
    }

    /// Run `f` with exclusive access to the model-checking bookkeeping
    pub fn with_vars<R>(&self, f: impl FnOnce(&mut ModelCheckingVars) -> R) -> R {
        f(&mut *self.vars.lock())
    }

    /// Count a new run and return its number, starting at 1
    pub(crate) fn begin_run(&self) -> u64 {
        self.runs.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Runs started so far
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Restore the clocks of `replay` and arm its forced decision
    pub fn prepare_replay(&self, replay: &Replay) {
        self.clocks.restore(replay.clock, replay.event_clock);
        self.with_vars(|vars| vars.arm(replay));
        tracing::debug!(
            choice_point = replay.choice_point,
            candidate = %replay.candidate,
            depth = replay.depth,
            "replay armed"
        );
    }

    pub(crate) fn take_forced(&self) -> Option<MachineKey> {
        self.with_vars(ModelCheckingVars::take_forced)
    }

    /// Clear clocks, bookkeeping and the run counter
    pub fn reset(&self) {
        self.clocks.reset();
        self.with_vars(ModelCheckingVars::reset);
        self.runs.store(0, Ordering::SeqCst);
    }
}
