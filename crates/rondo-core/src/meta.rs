//! Domain-layer collaborator
//!
//! The engine never interprets shared domain state itself. It asks the
//! [`MetaContext`] whether a user event is satisfied and how to deep-copy the
//! state when a run is cloned for replay.

use crate::condition::UserEvent;
use std::any::Any;
use std::fmt;

/// Shared domain state driven by the machines of a run
pub trait MetaContext: Send + fmt::Debug {
    /// Whether `event` matches the current domain state at virtual time `clock`
    fn event_fulfilled(&self, event: &UserEvent, clock: u64) -> bool;

    /// Independent deep copy of this state
    fn copy(&self) -> Box<dyn MetaContext>;

    /// Downcast support for typed access from automaton handlers
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Structured form used by status views and reports
    fn describe(&self) -> serde_json::Value {
        serde_json::Value::String(format!("{self:?}"))
    }
}

/// Domain with no state; user events are never fulfilled
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMeta;

impl MetaContext for NullMeta {
    fn event_fulfilled(&self, _event: &UserEvent, _clock: u64) -> bool {
        false
    }

    fn copy(&self) -> Box<dyn MetaContext> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
