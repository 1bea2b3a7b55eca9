//! The arbiter
//!
//! The controller is the single consumer of the inbound queue. Each LEAVE or
//! KICK triggers one decision: select the next machine, record a choice point
//! when model checking, drain ripe scheduler slots, then admit the winner or
//! move virtual time forward when nobody can run.

use crate::status::Status;
use rondo_core::{EngineError, MachineKey, Result, RipeSlot, Signal, SignalKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// STOP requested from outside the controller
    User,
    /// The end-of-simulation slot fired
    TtlExceeded(u64),
    /// No machine and no scheduled work left
    Completed,
    /// A fatal protocol violation or domain error ended the run
    Aborted,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::User => f.write_str("USER"),
            TerminationReason::TtlExceeded(ttl) => write!(f, "SYSTEM TTL {ttl} exceeded"),
            TerminationReason::Completed => f.write_str("COMPLETED"),
            TerminationReason::Aborted => f.write_str("ABORTED"),
        }
    }
}

/// Lifecycle of the arbitration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Serving the inbound queue
    Running,
    /// Cancelling every live machine
    Stopping,
    /// Terminal
    Stopped,
}

enum Drained {
    /// Ripe work slots processed
    Slots(usize),
    /// The end-of-simulation sentinel fired at this time
    End(u64),
}

pub(crate) struct Controller {
    status: Arc<Status>,
    state: ControllerState,
    last_mutations: Option<u64>,
}

impl Controller {
    pub(crate) fn new(status: Arc<Status>) -> Self {
        Self {
            status,
            state: ControllerState::Running,
            last_mutations: None,
        }
    }

    /// Serve the inbound queue until the run terminates
    pub(crate) fn run(mut self) -> TerminationReason {
        let reason = loop {
            let outcome = self.status.recv().and_then(|signal| self.handle(signal));
            match outcome {
                Ok(None) => {}
                Ok(Some(reason)) => break reason,
                Err(err) => {
                    tracing::error!(error = %err, "controller aborting run");
                    self.status.record_fatal(err);
                    break TerminationReason::Aborted;
                }
            }
        };
        self.shutdown();
        tracing::info!(
            %reason,
            clock = self.status.now(),
            state = ?self.state,
            "controller finished"
        );
        reason
    }

    fn handle(&mut self, signal: Signal) -> Result<Option<TerminationReason>> {
        tracing::trace!(%signal, "controller received");
        match signal.kind {
            SignalKind::Terminated => {
                self.status.acknowledge_termination();
                Ok(None)
            }
            SignalKind::Stop => Ok(Some(if self.status.fatal().is_some() {
                TerminationReason::Aborted
            } else {
                TerminationReason::User
            })),
            SignalKind::Kick => {
                if let Some(holder) = self.status.holder() {
                    tracing::trace!(machine = %holder, "KICK ignored while the section is held");
                    return Ok(None);
                }
                self.decide()
            }
            SignalKind::Leave => {
                self.status.clear_holder();
                self.decide()
            }
            SignalKind::Enter => Err(EngineError::protocol(
                "controller",
                format!("unexpected {signal} on inbound queue"),
            )),
        }
    }

    fn decide(&mut self) -> Result<Option<TerminationReason>> {
        let clock = self.status.now();
        self.status.note_decision();

        let forced = self.status.session().take_forced();
        let selected = match forced {
            Some(key) => {
                if self.status.control(&key).is_none() {
                    return Err(EngineError::protocol(
                        &key,
                        "forced replay candidate is not registered",
                    ));
                }
                tracing::debug!(machine = %key, clock, "forced decision");
                self.last_mutations = Some(self.status.mutations());
                Some(key)
            }
            None => {
                let selected = self.status.select(clock);
                if let Some(key) = &selected {
                    self.record_choice_point(key, clock);
                }
                selected
            }
        };

        let processed = match self.drain(clock)? {
            Drained::End(time) => return Ok(Some(TerminationReason::TtlExceeded(time))),
            Drained::Slots(processed) => processed,
        };

        match selected {
            Some(key) => {
                self.admit(&key, clock)?;
                Ok(None)
            }
            None => Ok(self.idle(clock, processed)),
        }
    }

    fn record_choice_point(&mut self, selected: &MachineKey, clock: u64) {
        if !self.status.config().mode.records_choice_points() {
            return;
        }
        let mutations = self.status.mutations();
        if self.last_mutations == Some(mutations) {
            return;
        }
        self.last_mutations = Some(mutations);

        let candidates = self.status.choice_candidates(selected, clock);
        if candidates.is_empty() {
            return;
        }
        let snapshot = self.status.clone_for_new_run();
        let session = self.status.session();
        let event_clock = session.clocks().event_now();
        let alternatives = candidates.len();
        let id = session.with_vars(|vars| vars.record(candidates, snapshot, clock, event_clock));
        self.status.note_choice_point();
        tracing::debug!(choice_point = id, machine = %selected, alternatives, clock, "recorded choice point");
    }

    /// Execute every ripe slot in time order
    fn drain(&self, clock: u64) -> Result<Drained> {
        let mut processed = 0;
        loop {
            match self.status.with_scheduler(|scheduler| scheduler.take_ripe(clock)) {
                None => return Ok(Drained::Slots(processed)),
                Some(RipeSlot::End { time }) => return Ok(Drained::End(time)),
                Some(RipeSlot::Work(slot)) => {
                    self.status.process_slot(&slot, clock)?;
                    processed += 1;
                }
            }
        }
    }

    fn admit(&self, key: &MachineKey, clock: u64) -> Result<()> {
        let control = self
            .status
            .control(key)
            .ok_or_else(|| EngineError::protocol(key, "selected machine is not registered"))?;
        control.mark_admitted(clock);
        self.status.record_admission(key);
        let now = self.status.session().clocks().advance(self.status.config().tick);
        tracing::debug!(machine = %key, clock, now, "admitting");
        control.grant()
    }

    /// Nobody is selectable: finish, or jump to the next moment something can
    /// change. Slots drained at this clock may already have made someone
    /// selectable, so time only moves when nothing was drained.
    fn idle(&self, clock: u64, processed: usize) -> Option<TerminationReason> {
        let pending_work = self.status.with_scheduler(|scheduler| scheduler.pending_work());
        if self.status.live_count() == 0 && pending_work == 0 {
            return Some(TerminationReason::Completed);
        }
        if processed > 0 {
            tracing::trace!(clock, processed, "slots drained, selecting again");
            self.status.kick("controller");
            return None;
        }

        let next_slot = self.status.with_scheduler(|scheduler| scheduler.next_time());
        let next_wakeup = self.status.earliest_wakeup(clock);
        let clocks = self.status.session().clocks();
        let now = match next_slot.into_iter().chain(next_wakeup).min() {
            Some(target) if target > clock => clocks.advance_to(target),
            _ => clocks.advance(self.status.config().tick),
        };
        tracing::debug!(from = clock, to = now, "idle, advancing virtual time");
        self.status.kick("controller");
        None
    }

    fn shutdown(&mut self) {
        self.state = ControllerState::Stopping;
        let controls = self.status.begin_stopping();
        tracing::debug!(machines = controls.len(), "cancelling live machines");
        for control in controls {
            control.cancel("controller");
        }
        self.state = ControllerState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_reasons_render_for_reports() {
        assert_eq!(TerminationReason::User.to_string(), "USER");
        assert_eq!(
            TerminationReason::TtlExceeded(5).to_string(),
            "SYSTEM TTL 5 exceeded"
        );
        assert_eq!(TerminationReason::Completed.to_string(), "COMPLETED");
    }
}
