//! Engine configuration
//!
//! Read-only settings fixed when an engine starts: time-to-live, tick size,
//! selection policy, verification mode and model-checking criteria.

mod traits;

pub use traits::{ConfigLoad, ConfigValidation};

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strategy used by the controller to pick the next admitted machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Smallest condition issue time, ignoring fulfillment
    MinIssueTime,
    /// Smallest condition issue time among fulfilled machines
    MinIssueTimeAndFulfilled,
    /// Least recently executed among fulfilled machines
    #[default]
    Fairness,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionPolicy::MinIssueTime => "min_issue_time",
            SelectionPolicy::MinIssueTimeAndFulfilled => "min_issue_time_and_fulfilled",
            SelectionPolicy::Fairness => "fairness",
        };
        f.write_str(name)
    }
}

impl FromStr for SelectionPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "minissuetime" => Ok(SelectionPolicy::MinIssueTime),
            "minissuetimeandfulfilled" => Ok(SelectionPolicy::MinIssueTimeAndFulfilled),
            "fairness" => Ok(SelectionPolicy::Fairness),
            _ => Err(EngineError::configuration(format!(
                "unknown selection policy '{s}'"
            ))),
        }
    }
}

/// How an ambiguous pick is resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    /// Deterministic first element
    #[default]
    First,
    /// Seeded random element
    Random,
}

impl FromStr for Pick {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Pick::First),
            "random" => Ok(Pick::Random),
            _ => Err(EngineError::configuration(format!("unknown pick '{s}'"))),
        }
    }
}

/// Execution strategy of a verification session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationMode {
    /// One run
    #[default]
    SingleRun,
    /// `runs` independent runs with different tie-break seeds
    Simulation {
        /// Number of runs
        runs: u32,
    },
    /// Exhaustive exploration of recorded choice points
    ModelChecking {
        /// Upper bound on the number of runs, initial run included
        #[serde(default)]
        max_runs: Option<u64>,
    },
}

impl VerificationMode {
    /// Whether choice points are recorded
    pub fn records_choice_points(&self) -> bool {
        matches!(self, VerificationMode::ModelChecking { .. })
    }
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationMode::SingleRun => f.write_str("single-run"),
            VerificationMode::Simulation { runs } => write!(f, "simulation({runs})"),
            VerificationMode::ModelChecking { max_runs: Some(max) } => {
                write!(f, "model-checking(max {max})")
            }
            VerificationMode::ModelChecking { max_runs: None } => f.write_str("model-checking"),
        }
    }
}

/// Tie-break criteria of the replay driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCheckingCriteria {
    /// Which candidate of a choice point to replay next
    pub candidate: Pick,
    /// Which recorded choice point to explore next; `first` is the most recent
    pub choice_point: Pick,
}

/// Condition kinds marked interrupted-by-choice-point when a run is cloned.
///
/// Only machines that have entered the critical section at least once are
/// marked; a machine still waiting for its first admission starts normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeBypass {
    /// Only user-event conditions
    UserEvent,
    /// Plain yields and user-event conditions; time waits are re-issued
    #[default]
    Untimed,
    /// Every wait
    AllWaits,
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overall simulation time-to-live
    pub ttl: u64,
    /// Virtual-time increment per admitting controller iteration
    pub tick: u64,
    /// Selection policy
    pub policy: SelectionPolicy,
    /// Verification mode
    pub mode: VerificationMode,
    /// Tie-break among equally ranked selection candidates. Simulation
    /// always breaks ties at random, see [`EngineConfig::selection_tie_break`].
    pub tie_break: Pick,
    /// Replay driver criteria
    pub model_checking: ModelCheckingCriteria,
    /// Base seed for random tie-breaks
    pub seed: u64,
    /// Bound of the controller inbound queue
    pub queue_capacity: usize,
    /// Resumption bypass scope for cloned runs.
    ///
    /// The default [`ResumeBypass::Untimed`] also bypasses plain yields, not
    /// only user-event waits. A replayed yield would otherwise spend the
    /// forced admission on re-issuing itself. Use [`ResumeBypass::UserEvent`]
    /// to mark user-event waits only.
    pub resume_bypass: ResumeBypass,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl: 1000,
            tick: 1,
            policy: SelectionPolicy::Fairness,
            mode: VerificationMode::SingleRun,
            tie_break: Pick::First,
            model_checking: ModelCheckingCriteria::default(),
            seed: 0,
            queue_capacity: 64,
            resume_bypass: ResumeBypass::Untimed,
        }
    }
}

impl EngineConfig {
    /// Set the time-to-live
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the selection policy
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the verification mode
    pub fn with_mode(mut self, mode: VerificationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the base seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Tie-break the selection policy actually uses.
    ///
    /// Simulation runs differ only by seed, so they always break ties at
    /// random; other modes follow `tie_break`.
    pub fn selection_tie_break(&self) -> Pick {
        match self.mode {
            VerificationMode::Simulation { .. } => Pick::Random,
            _ => self.tie_break,
        }
    }
}
