//! Signals exchanged on admission, control and controller inbound queues

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Admission into the critical section (controller → machine)
    Enter,
    /// Cancel (controller → machine) or global stop request (anyone → controller)
    Stop,
    /// Release of the critical section (machine → controller)
    Leave,
    /// Wake the controller with no holder present
    Kick,
    /// A machine has cleaned itself up and is gone (machine → controller)
    Terminated,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Enter => "ENTER",
            SignalKind::Stop => "STOP",
            SignalKind::Leave => "LEAVE",
            SignalKind::Kick => "KICK",
            SignalKind::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Who sent a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderKind {
    /// The controller or the embedding driver
    System,
    /// A machine thread
    Machine,
}

/// A signal with its sender and a diagnostic origin tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal kind
    pub kind: SignalKind,
    /// Sender category
    pub sender: SenderKind,
    /// Textual origin, typically a machine key or a component name
    pub origin: String,
}

impl Signal {
    /// Signal sent by the system side
    pub fn system(kind: SignalKind, origin: impl Into<String>) -> Self {
        Self {
            kind,
            sender: SenderKind::System,
            origin: origin.into(),
        }
    }

    /// Signal sent by a machine
    pub fn machine(kind: SignalKind, origin: impl Into<String>) -> Self {
        Self {
            kind,
            sender: SenderKind::Machine,
            origin: origin.into(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.kind, self.origin)
    }
}
