//! Unified error system for the rondo engine
//!
//! One error type covers every failure the engine can report. Protocol
//! violations indicate an engine or automaton defect and abort the run;
//! everything else is a configuration or domain problem surfaced to the caller.

use serde::{Deserialize, Serialize};

/// Unified error type for all rondo operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum EngineError {
    /// A machine or the controller broke the admission protocol
    #[error("Protocol violation by {machine}: {message}")]
    ProtocolViolation {
        /// Key of the offending machine, or `controller`
        machine: String,
        /// Nature of the violation
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    Configuration {
        /// Error message describing the invalid setting
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// Failure reported by the embedding domain (meta context, slot processor)
    #[error("Domain error: {message}")]
    Domain {
        /// Error message from the domain layer
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl EngineError {
    /// Create a protocol violation attributed to `machine`
    pub fn protocol(machine: impl ToString, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            machine: machine.to_string(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a domain error
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is an unrecoverable protocol defect
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

/// Standard result type for rondo operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violation_names_the_machine() {
        let err = EngineError::protocol("philosopher#3", "unexpected signal KICK on admission queue");
        assert!(err.is_protocol_violation());
        assert_eq!(
            err.to_string(),
            "Protocol violation by philosopher#3: unexpected signal KICK on admission queue"
        );
    }

    #[test]
    fn configuration_error_is_not_a_protocol_violation() {
        let err = EngineError::configuration("tick must be greater than 0");
        assert!(!err.is_protocol_violation());
        assert_eq!(err.to_string(), "Invalid configuration: tick must be greater than 0");
    }
}
