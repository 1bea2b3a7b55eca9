//! Serializable snapshots of a run without queues or threads

use crate::control::MachineControl;
use crate::machine::{LocalVars, MachineContext};
use rondo_core::{Condition, EngineError, MachineKey, Result, Slot, StateId};
use serde::Serialize;

/// One registered machine as seen from outside
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineView {
    /// Registry key
    pub key: MachineKey,
    /// Automaton name
    pub automaton: String,
    /// Current state
    pub state: StateId,
    /// Current wait descriptor
    pub condition: Condition,
    /// Virtual time of the last admission
    pub last_execution: Option<u64>,
    /// Critical-section entries so far
    pub entries: u64,
    /// Local variables
    pub locals: LocalVars,
    /// Application context
    pub context: MachineContext,
}

impl MachineView {
    pub(crate) fn of(control: &MachineControl) -> Self {
        let machine = control.machine();
        Self {
            key: control.key().clone(),
            automaton: machine.automaton().name().to_string(),
            state: machine.state(),
            condition: control.condition(),
            last_execution: control.last_execution(),
            entries: control.entries(),
            locals: machine.locals(),
            context: machine.context(),
        }
    }
}

/// A run as seen from outside: comparable across clones, printable by tools
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    /// Virtual time
    pub clock: u64,
    /// Event time
    pub event_clock: u64,
    /// Current critical-section holder
    pub holder: Option<MachineKey>,
    /// Registered machines in key order
    pub machines: Vec<MachineView>,
    /// Registered automaton names
    pub automata: Vec<String>,
    /// Pending scheduler slots in firing order
    pub slots: Vec<Slot>,
    /// Domain state as reported by the meta context
    pub meta: serde_json::Value,
    /// Shared-state mutations so far
    pub mutations: u64,
}

impl StatusView {
    /// Machine `key`, if registered
    pub fn machine(&self, key: &MachineKey) -> Option<&MachineView> {
        self.machines.iter().find(|machine| &machine.key == key)
    }

    /// Pretty JSON rendering
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::internal(format!("failed to render status view: {e}")))
    }
}
