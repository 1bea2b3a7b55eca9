//! Identifiers for machines and automaton states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry key of a running machine, `<name>#<id>`.
///
/// Keys order lexicographically; registries keyed by `MachineKey` iterate in a
/// fixed order, which makes selection tie-breaks reproducible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MachineKey(String);

impl MachineKey {
    /// Build the key for machine `name` with numeric id `id`
    pub fn new(name: &str, id: u64) -> Self {
        Self(format!("{name}#{id}"))
    }

    /// Wrap an already formatted key
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MachineKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Identifier of a state inside an automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub u32);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}
