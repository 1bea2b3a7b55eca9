//! Running automaton instances
//!
//! A [`Machine`] is one instance of an [`Automaton`]: identity, current state,
//! local variables and an application-facing context. Handlers reach their
//! machine through a [`MachineHandle`], which also carries the machine's
//! control record when the machine is independently scheduled.

use crate::automaton::{Automaton, HandlerOutcome};
use crate::control::MachineControl;
use crate::status::Status;
use parking_lot::Mutex;
use rondo_core::{
    EngineError, MachineKey, MetaContext, Result, StateId, TargetTime, UserEvent, WaitRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a machine is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartMode {
    /// Own thread and control record, admitted by the controller
    Scheduled,
    /// Runs inline on its caller's thread; cannot suspend
    Synchronous,
}

/// Local variables of a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalVars(BTreeMap<String, Value>);

impl LocalVars {
    /// Empty variable set
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Value of `name` as an unsigned integer
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.0.get(name).and_then(Value::as_u64)
    }

    /// Set `name` to `value`
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Remove `name`
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Add one to the integer `name` (missing counts as zero), returning the new value
    pub fn increment(&mut self, name: &str) -> u64 {
        let next = self.get_u64(name).unwrap_or(0) + 1;
        self.set(name, next);
        next
    }

    /// Variables in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no variable is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Application-facing context of a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineContext {
    /// Start parameters
    pub params: BTreeMap<String, Value>,
    /// Machine that started this one, if any
    pub parent: Option<MachineKey>,
    /// Free-form notes recorded by handlers
    pub notes: Vec<String>,
}

impl MachineContext {
    /// Context with a single start parameter
    pub fn with_param(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut context = Self::default();
        context.params.insert(name.into(), value.into());
        context
    }
}

/// One running instance of an automaton
pub struct Machine {
    key: MachineKey,
    name: String,
    id: u64,
    automaton: Arc<Automaton>,
    start_mode: StartMode,
    start_time: u64,
    state: Mutex<StateId>,
    locals: Mutex<LocalVars>,
    context: Mutex<MachineContext>,
}

impl Machine {
    pub(crate) fn new(
        name: &str,
        id: u64,
        automaton: Arc<Automaton>,
        start_mode: StartMode,
        start_time: u64,
        locals: LocalVars,
        context: MachineContext,
    ) -> Self {
        automaton.note_instance();
        Self {
            key: MachineKey::new(name, id),
            name: name.to_string(),
            id,
            state: Mutex::new(automaton.initial_state()),
            automaton,
            start_mode,
            start_time,
            locals: Mutex::new(locals),
            context: Mutex::new(context),
        }
    }

    /// Registry key
    pub fn key(&self) -> &MachineKey {
        &self.key
    }

    /// Machine name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Program this machine runs
    pub fn automaton(&self) -> &Arc<Automaton> {
        &self.automaton
    }

    /// Start discipline
    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    /// Virtual time at which the machine was started
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Current state
    pub fn state(&self) -> StateId {
        *self.state.lock()
    }

    /// Move to `state`; takes effect when the current handler returns
    pub fn set_state(&self, state: StateId) {
        *self.state.lock() = state;
    }

    /// Run `f` with exclusive access to the local variables
    pub fn with_locals<R>(&self, f: impl FnOnce(&mut LocalVars) -> R) -> R {
        f(&mut *self.locals.lock())
    }

    /// Copy of the local variables
    pub fn locals(&self) -> LocalVars {
        self.locals.lock().clone()
    }

    /// Run `f` with exclusive access to the context
    pub fn with_context<R>(&self, f: impl FnOnce(&mut MachineContext) -> R) -> R {
        f(&mut *self.context.lock())
    }

    /// Copy of the context
    pub fn context(&self) -> MachineContext {
        self.context.lock().clone()
    }

    /// Independent copy for a new run. Locals go through the automaton's
    /// copy and alias hooks; the automaton itself is shared.
    pub(crate) fn deep_copy(&self, meta: &dyn MetaContext) -> Machine {
        let mut locals = self.automaton.copy_locals(&self.locals.lock());
        self.automaton.resolve_aliases(&mut locals, meta);
        Machine {
            key: self.key.clone(),
            name: self.name.clone(),
            id: self.id,
            automaton: Arc::clone(&self.automaton),
            start_mode: self.start_mode,
            start_time: self.start_time,
            state: Mutex::new(self.state()),
            locals: Mutex::new(locals),
            context: Mutex::new(self.context()),
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("key", &self.key)
            .field("automaton", &self.automaton.name())
            .field("state", &self.state())
            .field("start_mode", &self.start_mode)
            .finish_non_exhaustive()
    }
}

/// What a state handler sees of its machine
#[derive(Debug, Clone)]
pub struct MachineHandle {
    machine: Arc<Machine>,
    control: Option<Arc<MachineControl>>,
}

impl MachineHandle {
    pub(crate) fn scheduled(control: Arc<MachineControl>) -> Self {
        Self {
            machine: Arc::clone(control.machine()),
            control: Some(control),
        }
    }

    pub(crate) fn synchronous(machine: Arc<Machine>) -> Self {
        Self {
            machine,
            control: None,
        }
    }

    /// The running machine
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// Registry key of the running machine
    pub fn key(&self) -> &MachineKey {
        self.machine.key()
    }

    /// Control record, for scheduled machines
    pub fn control(&self) -> Option<&Arc<MachineControl>> {
        self.control.as_ref()
    }

    /// Move to `state`
    pub fn goto(&self, state: StateId) {
        self.machine.set_state(state);
    }

    /// Run `f` with exclusive access to the local variables
    pub fn with_locals<R>(&self, f: impl FnOnce(&mut LocalVars) -> R) -> R {
        self.machine.with_locals(f)
    }

    /// Unified suspension primitive. Returns `Ok(false)` when the wait was
    /// cancelled; the handler must then unwind with [`HandlerOutcome::Stopped`].
    pub fn wait(&self, status: &Status, request: WaitRequest) -> Result<bool> {
        let control = self.control.as_ref().ok_or_else(|| {
            EngineError::protocol(
                self.key(),
                "synchronous machine called a suspend-only primitive",
            )
        })?;
        control.wait(status, request)
    }

    /// Yield the critical section without waiting for anything
    pub fn wait_nothing(&self, status: &Status, generate_choice: bool) -> Result<bool> {
        self.wait(status, WaitRequest::nothing().with_choice(generate_choice))
    }

    /// Wait until virtual time reaches `target`
    pub fn wait_for_time(
        &self,
        status: &Status,
        target: TargetTime,
        generate_choice: bool,
    ) -> Result<bool> {
        self.wait(status, WaitRequest::time(target).with_choice(generate_choice))
    }

    /// Wait until the domain state matches `event`
    pub fn wait_for_event(
        &self,
        status: &Status,
        event: UserEvent,
        generate_choice: bool,
    ) -> Result<bool> {
        self.wait(
            status,
            WaitRequest::user_event(event, TargetTime::At(0)).with_choice(generate_choice),
        )
    }
}

/// Run state handlers until one of them leaves the loop
pub(crate) fn run_states(status: &Arc<Status>, handle: &MachineHandle) -> Result<HandlerOutcome> {
    let automaton = Arc::clone(handle.machine().automaton());
    loop {
        let state = handle.machine().state();
        let handler = automaton.handler(state).ok_or_else(|| {
            EngineError::protocol(
                handle.key(),
                format!("state {state} is not declared by automaton '{}'", automaton.name()),
            )
        })?;
        tracing::trace!(machine = %handle.key(), %state, "running state handler");
        match handler(status, handle)? {
            HandlerOutcome::Continue => continue,
            outcome => return Ok(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_treats_missing_as_zero() {
        let mut locals = LocalVars::new();
        assert_eq!(locals.increment("turns"), 1);
        assert_eq!(locals.increment("turns"), 2);
        assert_eq!(locals.get_u64("turns"), Some(2));
    }

    #[test]
    fn context_param_helper() {
        let context = MachineContext::with_param("peer", "pong#1");
        assert_eq!(context.params.get("peer"), Some(&Value::from("pong#1")));
        assert!(context.parent.is_none());
    }
}
