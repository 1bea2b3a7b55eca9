//! Per-machine synchronization records
//!
//! A [`MachineControl`] pairs a scheduled machine with two single-slot queues:
//! the admission queue, on which the controller grants the critical section,
//! and the control queue, on which it delivers cancellation. A machine blocked
//! in [`MachineControl::enter_critical_section`] wakes on whichever arrives first.

use crate::automaton::HandlerOutcome;
use crate::machine::{run_states, Machine, MachineHandle};
use crate::status::Status;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use rondo_core::{
    Condition, ConditionKind, EngineError, MachineKey, MetaContext, ResumeBypass, Result, Signal,
    SignalKind, WaitRequest,
};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Synchronization record of one scheduled machine
pub struct MachineControl {
    machine: Arc<Machine>,
    admission_tx: Sender<Signal>,
    admission_rx: Receiver<Signal>,
    control_tx: Sender<Signal>,
    control_rx: Receiver<Signal>,
    condition: Mutex<Condition>,
    last_execution: Mutex<Option<u64>>,
    entries: AtomicU64,
    holding: AtomicBool,
    launched: AtomicBool,
}

impl MachineControl {
    pub(crate) fn new(machine: Arc<Machine>, issue_time: u64) -> Self {
        Self::with_state(machine, Condition::initial(issue_time), None, 0)
    }

    fn with_state(
        machine: Arc<Machine>,
        condition: Condition,
        last_execution: Option<u64>,
        entries: u64,
    ) -> Self {
        let (admission_tx, admission_rx) = bounded(1);
        let (control_tx, control_rx) = bounded(1);
        Self {
            machine,
            admission_tx,
            admission_rx,
            control_tx,
            control_rx,
            condition: Mutex::new(condition),
            last_execution: Mutex::new(last_execution),
            entries: AtomicU64::new(entries),
            holding: AtomicBool::new(false),
            launched: AtomicBool::new(false),
        }
    }

    /// Registry key of the controlled machine
    pub fn key(&self) -> &MachineKey {
        self.machine.key()
    }

    /// The controlled machine
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// Copy of the current condition
    pub fn condition(&self) -> Condition {
        self.condition.lock().clone()
    }

    pub(crate) fn with_condition<R>(&self, f: impl FnOnce(&Condition) -> R) -> R {
        f(&self.condition.lock())
    }

    /// Virtual time of the last admission, `None` before the first one
    pub fn last_execution(&self) -> Option<u64> {
        *self.last_execution.lock()
    }

    /// Number of critical-section entries by this machine
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::SeqCst)
    }

    /// Whether the machine currently holds the critical section
    pub fn is_holding(&self) -> bool {
        self.holding.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_launched(&self) -> bool {
        !self.launched.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn mark_admitted(&self, clock: u64) {
        *self.last_execution.lock() = Some(clock);
    }

    #[cfg(test)]
    pub(crate) fn replace_condition(&self, condition: Condition) {
        *self.condition.lock() = condition;
    }

    /// Grant the critical section; called by the controller only
    pub(crate) fn grant(&self) -> Result<()> {
        match self
            .admission_tx
            .try_send(Signal::system(SignalKind::Enter, "controller"))
        {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EngineError::protocol(
                self.key(),
                "admitted while a previous admission is still pending",
            )),
            Err(TrySendError::Disconnected(_)) => Err(EngineError::internal(format!(
                "admission queue of {} is closed",
                self.key()
            ))),
        }
    }

    /// Deliver a cancel signal; a pending one is left in place
    pub(crate) fn cancel(&self, origin: &str) {
        match self
            .control_tx
            .try_send(Signal::system(SignalKind::Stop, origin))
        {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(machine = %self.key(), "control queue closed before cancel");
            }
        }
    }

    /// Block until admitted (`Ok(true)`) or cancelled (`Ok(false)`).
    ///
    /// A cancel that is already queued wins over a pending admission.
    pub fn enter_critical_section(&self, status: &Status) -> Result<bool> {
        if self.cancel_pending()? {
            tracing::debug!(machine = %self.key(), "cancelled before admission");
            return Ok(false);
        }
        select! {
            recv(self.admission_rx) -> msg => match msg {
                Ok(Signal { kind: SignalKind::Enter, .. }) => {
                    if self.cancel_pending()? {
                        tracing::debug!(machine = %self.key(), "admission dropped, run is stopping");
                        return Ok(false);
                    }
                    self.holding.store(true, Ordering::SeqCst);
                    self.entries.fetch_add(1, Ordering::SeqCst);
                    status.record_entry(self.key());
                    Ok(true)
                }
                Ok(signal) => Err(EngineError::protocol(
                    self.key(),
                    format!("unexpected {signal} on admission queue"),
                )),
                Err(_) => Err(EngineError::internal(format!(
                    "admission queue of {} disconnected",
                    self.key()
                ))),
            },
            recv(self.control_rx) -> msg => match msg {
                Ok(Signal { kind: SignalKind::Stop, .. }) => {
                    tracing::debug!(machine = %self.key(), "cancelled while waiting for admission");
                    Ok(false)
                }
                Ok(signal) => Err(EngineError::protocol(
                    self.key(),
                    format!("unexpected {signal} on control queue"),
                )),
                Err(_) => Err(EngineError::internal(format!(
                    "control queue of {} disconnected",
                    self.key()
                ))),
            },
        }
    }

    /// Consume a queued cancel signal, if any
    fn cancel_pending(&self) -> Result<bool> {
        match self.control_rx.try_recv() {
            Ok(Signal { kind: SignalKind::Stop, .. }) => Ok(true),
            Ok(signal) => Err(EngineError::protocol(
                self.key(),
                format!("unexpected {signal} on control queue"),
            )),
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(EngineError::internal(format!(
                "control queue of {} disconnected",
                self.key()
            ))),
        }
    }

    /// Release the critical section without waiting for acknowledgement
    pub fn leave_critical_section(&self, status: &Status) -> Result<()> {
        if !self.holding.swap(false, Ordering::SeqCst) {
            return Err(EngineError::protocol(
                self.key(),
                "released a critical section it does not hold",
            ));
        }
        status.record_exit(self.key());
        status.send(Signal::machine(SignalKind::Leave, self.key().as_str()))
    }

    /// Unified suspension primitive of scheduled machines
    pub fn wait(&self, status: &Status, request: WaitRequest) -> Result<bool> {
        request.validate(self.key().as_str())?;
        let issue_time = status.session().clocks().tick_event();
        {
            let mut condition = self.condition.lock();
            if condition.interrupted_by_choice_point {
                tracing::debug!(machine = %self.key(), "resuming recorded wait without re-admission");
                condition.reset();
                return Ok(true);
            }
            condition.set(&request, issue_time, status.config().ttl);
        }

        self.leave_critical_section(status)?;
        let entered = self.enter_critical_section(status);
        self.condition.lock().reset();
        entered
    }

    /// Independent copy for a new run: fresh queues, copied scalars, deep-copied
    /// condition and machine
    pub(crate) fn clone_for_new_run(
        &self,
        meta: &dyn MetaContext,
        bypass: ResumeBypass,
    ) -> MachineControl {
        let mut condition = self.condition();
        let waiting = self.entries() > 0 && !condition.placeholder;
        condition.interrupted_by_choice_point = waiting
            && match (bypass, condition.kind) {
                (_, ConditionKind::UserEvent) => true,
                (ResumeBypass::Untimed | ResumeBypass::AllWaits, ConditionKind::None) => true,
                (ResumeBypass::AllWaits, ConditionKind::Time) => true,
                _ => false,
            };
        MachineControl::with_state(
            Arc::new(self.machine.deep_copy(meta)),
            condition,
            self.last_execution(),
            self.entries(),
        )
    }
}

impl fmt::Debug for MachineControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineControl")
            .field("machine", &self.key())
            .field("condition", &self.condition())
            .field("last_execution", &self.last_execution())
            .field("entries", &self.entries())
            .finish_non_exhaustive()
    }
}

/// Posts TERMINATED when a machine thread ends, unwinding included
struct TerminationNotice {
    status: Arc<Status>,
    key: MachineKey,
}

impl Drop for TerminationNotice {
    fn drop(&mut self) {
        let signal = Signal::machine(SignalKind::Terminated, self.key.as_str());
        if let Err(err) = self.status.send(signal) {
            tracing::warn!(machine = %self.key, error = %err, "could not report termination");
        }
    }
}

/// Body of a scheduled machine's thread
pub(crate) fn machine_main(status: Arc<Status>, control: Arc<MachineControl>) {
    let key = control.key().clone();
    let _notice = TerminationNotice {
        status: Arc::clone(&status),
        key: key.clone(),
    };
    let handle = MachineHandle::scheduled(Arc::clone(&control));

    let result = match control.enter_critical_section(&status) {
        Ok(true) => panic::catch_unwind(AssertUnwindSafe(|| run_states(&status, &handle)))
            .unwrap_or_else(|_| {
                Err(EngineError::internal(format!("state handler of {key} panicked")))
            }),
        Ok(false) => Ok(HandlerOutcome::Stopped),
        Err(err) => Err(err),
    };

    status.deregister(&key);
    match result {
        Ok(HandlerOutcome::Exit) => {
            tracing::debug!(machine = %key, "exited normally");
            release_if_holding(&status, &control);
        }
        Ok(_) => {
            tracing::debug!(machine = %key, "unwound after cancellation");
            release_if_holding(&status, &control);
        }
        Err(err) => {
            tracing::error!(machine = %key, error = %err, "fatal error in machine");
            release_if_holding(&status, &control);
            status.abort(err);
        }
    }
    status.note_terminated();
}

fn release_if_holding(status: &Status, control: &MachineControl) {
    if control.is_holding() {
        if let Err(err) = control.leave_critical_section(status) {
            tracing::warn!(machine = %control.key(), error = %err, "release on exit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::Automaton;
    use crate::machine::{LocalVars, MachineContext, StartMode};
    use crate::session::Session;
    use assert_matches::assert_matches;
    use rondo_core::{EngineConfig, NoopSlotProcessor, NullMeta, StateId, TargetTime, UserEvent};

    fn fixture() -> (Arc<Status>, MachineControl) {
        let status = Status::new(
            EngineConfig::default(),
            Arc::new(Session::new()),
            Box::new(NullMeta),
            Arc::new(NoopSlotProcessor),
        )
        .unwrap();
        let automaton = Automaton::builder("noop")
            .state(StateId(0), "done", |_, _| Ok(HandlerOutcome::Exit))
            .build()
            .unwrap();
        let machine = Machine::new(
            "m",
            0,
            automaton,
            StartMode::Scheduled,
            0,
            LocalVars::new(),
            MachineContext::default(),
        );
        (status, MachineControl::new(Arc::new(machine), 1))
    }

    #[test]
    fn cancel_wins_when_no_admission_is_pending() {
        let (status, control) = fixture();
        control.cancel("test");
        assert_matches!(control.enter_critical_section(&status), Ok(false));
        assert!(!control.is_holding());
    }

    #[test]
    fn cancel_queued_behind_an_admission_still_wins() {
        for _ in 0..50 {
            let (status, control) = fixture();
            control.grant().unwrap();
            control.cancel("controller");
            assert_matches!(control.enter_critical_section(&status), Ok(false));
            assert!(!control.is_holding());
            assert_eq!(control.entries(), 0);
            assert_eq!(status.holder(), None);
        }
    }

    #[test]
    fn admission_marks_the_holder_and_release_posts_leave() {
        let (status, control) = fixture();
        control.grant().unwrap();
        assert_matches!(control.enter_critical_section(&status), Ok(true));
        assert_eq!(status.holder(), Some(control.key().clone()));
        assert_eq!(control.entries(), 1);

        control.leave_critical_section(&status).unwrap();
        let signal = status.recv().unwrap();
        assert_eq!(signal.kind, SignalKind::Leave);
        assert_eq!(signal.origin, "m#0");
    }

    #[test]
    fn second_pending_admission_is_a_protocol_violation() {
        let (_status, control) = fixture();
        control.grant().unwrap();
        assert!(control.grant().unwrap_err().is_protocol_violation());
    }

    #[test]
    fn releasing_without_holding_is_a_protocol_violation() {
        let (status, control) = fixture();
        assert!(control
            .leave_critical_section(&status)
            .unwrap_err()
            .is_protocol_violation());
    }

    #[test]
    fn interrupted_wait_returns_without_releasing() {
        let (status, control) = fixture();
        let mut condition = Condition::initial(0);
        condition.set(
            &WaitRequest::user_event(UserEvent::named("token"), TargetTime::At(0)),
            1,
            100,
        );
        condition.interrupted_by_choice_point = true;
        control.replace_condition(condition);

        let request = WaitRequest::user_event(UserEvent::named("token"), TargetTime::At(0));
        assert_matches!(control.wait(&status, request), Ok(true));
        assert_eq!(control.condition().kind, ConditionKind::None);
        assert!(!control.condition().interrupted_by_choice_point);
        assert!(status.inbound_is_empty());
    }

    #[test]
    fn clone_marks_waits_by_bypass_scope() {
        let (status, control) = fixture();
        let mut condition = Condition::initial(0);
        let copy = control.clone_for_new_run(&NullMeta, ResumeBypass::AllWaits);
        assert!(!copy.condition().interrupted_by_choice_point, "never entered");

        control.grant().unwrap();
        assert_matches!(control.enter_critical_section(&status), Ok(true));

        condition.set(&WaitRequest::nothing(), 1, 100);
        control.replace_condition(condition.clone());
        let copy = control.clone_for_new_run(&NullMeta, ResumeBypass::UserEvent);
        assert!(!copy.condition().interrupted_by_choice_point);
        let copy = control.clone_for_new_run(&NullMeta, ResumeBypass::Untimed);
        assert!(copy.condition().interrupted_by_choice_point);

        condition.set(&WaitRequest::time(TargetTime::At(9)), 1, 100);
        control.replace_condition(condition.clone());
        let copy = control.clone_for_new_run(&NullMeta, ResumeBypass::Untimed);
        assert!(!copy.condition().interrupted_by_choice_point);
        let copy = control.clone_for_new_run(&NullMeta, ResumeBypass::AllWaits);
        assert!(copy.condition().interrupted_by_choice_point);

        condition.set(
            &WaitRequest::user_event(UserEvent::named("token"), TargetTime::At(0)),
            2,
            100,
        );
        control.replace_condition(condition);
        let copy = control.clone_for_new_run(&NullMeta, ResumeBypass::UserEvent);
        assert!(copy.condition().interrupted_by_choice_point);
        assert!(!control.condition().interrupted_by_choice_point);
        assert!(!Arc::ptr_eq(copy.machine(), control.machine()));
    }
}
