//! Immutable automaton programs
//!
//! An [`Automaton`] maps state identifiers to handlers. It is built once,
//! shared by reference between all of its machines and between every clone of
//! a run, and never mutated afterwards apart from usage statistics.

use crate::machine::{LocalVars, MachineHandle};
use crate::status::Status;
use rondo_core::{EngineError, MetaContext, Result, StateId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What a state handler asks the machine loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Run the handler of the (possibly updated) current state
    Continue,
    /// The automaton finished normally
    Exit,
    /// A wait was cancelled; unwind without re-entering
    Stopped,
}

/// State handler capability
pub type StateHandler =
    Arc<dyn Fn(&Arc<Status>, &MachineHandle) -> Result<HandlerOutcome> + Send + Sync>;

/// Deep-copy hook for machine local variables
pub type CopyHook = Arc<dyn Fn(&LocalVars) -> LocalVars + Send + Sync>;

/// Re-resolves references held in local variables against a copied domain state
pub type AliasHook = Arc<dyn Fn(&mut LocalVars, &dyn MetaContext) + Send + Sync>;

struct StateEntry {
    handler: StateHandler,
    comment: String,
    usage: AtomicU64,
}

/// An immutable named state-handler program
pub struct Automaton {
    name: String,
    initial: StateId,
    states: BTreeMap<StateId, StateEntry>,
    copy_hook: CopyHook,
    alias_hook: AliasHook,
    instances: AtomicU64,
}

impl Automaton {
    /// Start building an automaton called `name`
    pub fn builder(name: impl Into<String>) -> AutomatonBuilder {
        AutomatonBuilder {
            name: name.into(),
            initial: None,
            states: BTreeMap::new(),
            duplicate: None,
            copy_hook: None,
            alias_hook: None,
        }
    }

    /// Automaton name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State a new machine starts in
    pub fn initial_state(&self) -> StateId {
        self.initial
    }

    /// Handler of `state`, counting the lookup as one use
    pub fn handler(&self, state: StateId) -> Option<StateHandler> {
        self.states.get(&state).map(|entry| {
            entry.usage.fetch_add(1, Ordering::Relaxed);
            Arc::clone(&entry.handler)
        })
    }

    /// Human-readable comment of `state`
    pub fn comment(&self, state: StateId) -> Option<&str> {
        self.states.get(&state).map(|entry| entry.comment.as_str())
    }

    /// How many times the handler of `state` was invoked
    pub fn usage(&self, state: StateId) -> u64 {
        self.states
            .get(&state)
            .map_or(0, |entry| entry.usage.load(Ordering::Relaxed))
    }

    /// How many machines were instantiated from this automaton
    pub fn instances(&self) -> u64 {
        self.instances.load(Ordering::Relaxed)
    }

    pub(crate) fn note_instance(&self) {
        self.instances.fetch_add(1, Ordering::Relaxed);
    }

    /// Declared state identifiers in order
    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.keys().copied()
    }

    /// Deep-copy local variables with the automaton's copy hook
    pub fn copy_locals(&self, locals: &LocalVars) -> LocalVars {
        (self.copy_hook)(locals)
    }

    /// Re-resolve aliases in copied local variables
    pub fn resolve_aliases(&self, locals: &mut LocalVars, meta: &dyn MetaContext) {
        (self.alias_hook)(locals, meta);
    }
}

impl fmt::Debug for Automaton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Automaton")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder collecting states before the automaton is frozen
pub struct AutomatonBuilder {
    name: String,
    initial: Option<StateId>,
    states: BTreeMap<StateId, StateEntry>,
    duplicate: Option<StateId>,
    copy_hook: Option<CopyHook>,
    alias_hook: Option<AliasHook>,
}

impl AutomatonBuilder {
    /// Add a state with its handler and a comment. The first state added is
    /// the initial state unless [`initial`](Self::initial) says otherwise.
    pub fn state<F>(mut self, id: StateId, comment: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Arc<Status>, &MachineHandle) -> Result<HandlerOutcome> + Send + Sync + 'static,
    {
        if self.states.contains_key(&id) {
            self.duplicate.get_or_insert(id);
            return self;
        }
        self.initial.get_or_insert(id);
        self.states.insert(
            id,
            StateEntry {
                handler: Arc::new(handler),
                comment: comment.into(),
                usage: AtomicU64::new(0),
            },
        );
        self
    }

    /// Choose the initial state explicitly
    pub fn initial(mut self, id: StateId) -> Self {
        self.initial = Some(id);
        self
    }

    /// Override the local-variable copy hook
    pub fn copy_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LocalVars) -> LocalVars + Send + Sync + 'static,
    {
        self.copy_hook = Some(Arc::new(hook));
        self
    }

    /// Override the alias re-resolution hook
    pub fn alias_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut LocalVars, &dyn MetaContext) + Send + Sync + 'static,
    {
        self.alias_hook = Some(Arc::new(hook));
        self
    }

    /// Freeze the automaton
    pub fn build(self) -> Result<Arc<Automaton>> {
        if let Some(id) = self.duplicate {
            return Err(EngineError::configuration(format!(
                "automaton '{}' declares state {id} twice",
                self.name
            )));
        }
        let initial = self.initial.ok_or_else(|| {
            EngineError::configuration(format!("automaton '{}' has no states", self.name))
        })?;
        if !self.states.contains_key(&initial) {
            return Err(EngineError::configuration(format!(
                "automaton '{}' starts in undeclared state {initial}",
                self.name
            )));
        }

        let copy_hook: CopyHook = match self.copy_hook {
            Some(hook) => hook,
            None => Arc::new(|locals: &LocalVars| locals.clone()),
        };
        let alias_hook: AliasHook = match self.alias_hook {
            Some(hook) => hook,
            None => Arc::new(|_: &mut LocalVars, _: &dyn MetaContext| {}),
        };

        Ok(Arc::new(Automaton {
            name: self.name,
            initial,
            states: self.states,
            copy_hook,
            alias_hook,
            instances: AtomicU64::new(0),
        }))
    }
}
