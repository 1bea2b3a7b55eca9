//! Wait descriptors
//!
//! A [`Condition`] records what a machine is waiting for while it is outside
//! the critical section. The controller evaluates conditions to decide who may
//! be admitted next; the model checker evaluates them to find alternative
//! candidates worth branching on.

use crate::errors::{EngineError, Result};
use crate::meta::MetaContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a machine waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    /// Nothing; always fulfilled (plain yield)
    None,
    /// A virtual time
    Time,
    /// An application-defined event matched against the domain state
    UserEvent,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConditionKind::None => "none",
            ConditionKind::Time => "time",
            ConditionKind::UserEvent => "user-event",
        };
        f.write_str(name)
    }
}

/// Target time of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetTime {
    /// Absolute virtual time
    At(u64),
    /// No bound; resolved to the simulation time-to-live
    Infinite,
}

impl TargetTime {
    /// Resolve against the simulation time-to-live
    pub fn resolve(self, ttl: u64) -> u64 {
        match self {
            TargetTime::At(at) => at,
            TargetTime::Infinite => ttl,
        }
    }
}

/// Application-defined event a machine can wait for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    /// Event name, interpreted by the domain layer
    pub name: String,
    /// Event arguments
    pub payload: serde_json::Value,
}

impl UserEvent {
    /// Event without arguments
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Event with arguments
    pub fn with_payload(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Arguments of the unified suspension primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitRequest {
    /// Condition kind
    pub kind: ConditionKind,
    /// Earliest virtual time at which the condition may be fulfilled
    pub target: TargetTime,
    /// Event payload, required for [`ConditionKind::UserEvent`]
    pub event: Option<UserEvent>,
    /// Whether this wait may become a branch alternative in model checking
    pub generate_choice: bool,
}

impl WaitRequest {
    /// Yield only
    pub fn nothing() -> Self {
        Self {
            kind: ConditionKind::None,
            target: TargetTime::At(0),
            event: None,
            generate_choice: false,
        }
    }

    /// Wait until virtual time reaches `target`
    pub fn time(target: TargetTime) -> Self {
        Self {
            kind: ConditionKind::Time,
            target,
            event: None,
            generate_choice: false,
        }
    }

    /// Wait until `event` matches the domain state, no earlier than `target`
    pub fn user_event(event: UserEvent, target: TargetTime) -> Self {
        Self {
            kind: ConditionKind::UserEvent,
            target,
            event: Some(event),
            generate_choice: false,
        }
    }

    /// Set the generate-choice flag
    pub fn with_choice(mut self, generate_choice: bool) -> Self {
        self.generate_choice = generate_choice;
        self
    }

    /// Reject requests that cannot be represented as a condition
    pub fn validate(&self, machine: &str) -> Result<()> {
        if self.kind == ConditionKind::UserEvent && self.event.is_none() {
            return Err(EngineError::protocol(
                machine,
                "wait for user event issued without an event payload",
            ));
        }
        Ok(())
    }
}

/// Wait descriptor owned by a machine control record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// What is awaited
    pub kind: ConditionKind,
    /// Event-clock value when the wait was issued
    pub issue_time: u64,
    /// Virtual time from which the condition may be fulfilled
    pub target_time: u64,
    /// Awaited event, for user-event conditions
    pub event: Option<UserEvent>,
    /// Candidate for model-checking branches
    pub generate_choice: bool,
    /// Next wait returns immediately after a replay resumed this machine
    pub interrupted_by_choice_point: bool,
    /// Cleared after a successful re-entry; not a real wait
    pub placeholder: bool,
}

impl Condition {
    /// Condition of a freshly started machine
    pub fn initial(issue_time: u64) -> Self {
        Self {
            kind: ConditionKind::None,
            issue_time,
            target_time: 0,
            event: None,
            generate_choice: false,
            interrupted_by_choice_point: false,
            placeholder: false,
        }
    }

    /// Fill the condition for a new wait
    pub fn set(&mut self, request: &WaitRequest, issue_time: u64, ttl: u64) {
        self.kind = request.kind;
        self.issue_time = issue_time;
        self.target_time = match request.kind {
            ConditionKind::None => 0,
            ConditionKind::Time | ConditionKind::UserEvent => request.target.resolve(ttl),
        };
        self.event = request.event.clone();
        self.generate_choice = request.generate_choice;
        self.interrupted_by_choice_point = false;
        self.placeholder = false;
    }

    /// Back to "none" after re-entry
    pub fn reset(&mut self) {
        self.kind = ConditionKind::None;
        self.target_time = 0;
        self.event = None;
        self.generate_choice = false;
        self.interrupted_by_choice_point = false;
        self.placeholder = true;
    }

    /// Fulfillment predicate at virtual time `clock`
    pub fn is_fulfilled(&self, clock: u64, meta: &dyn MetaContext) -> bool {
        match self.kind {
            ConditionKind::None => true,
            ConditionKind::Time => clock >= self.target_time,
            ConditionKind::UserEvent => {
                clock >= self.target_time
                    && self
                        .event
                        .as_ref()
                        .is_some_and(|event| meta.event_fulfilled(event, clock))
            }
        }
    }

    /// Whether this condition makes its machine a branch alternative
    pub fn is_choice_candidate(&self, clock: u64, meta: &dyn MetaContext) -> bool {
        self.generate_choice && !self.placeholder && self.is_fulfilled(clock, meta)
    }

    /// Future wake-up time for time and user-event conditions that are not yet due
    pub fn pending_wakeup(&self, clock: u64) -> Option<u64> {
        let timed = matches!(self.kind, ConditionKind::Time | ConditionKind::UserEvent);
        (timed && self.target_time > clock).then_some(self.target_time)
    }
}
