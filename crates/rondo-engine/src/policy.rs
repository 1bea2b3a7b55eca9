//! Selection policies
//!
//! Each policy ranks the registered controls; the lowest rank wins. Machines a
//! policy excludes have no rank. Equal ranks are broken by registry key order
//! or, with [`Pick::Random`], by the run's seeded generator.

use crate::control::MachineControl;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rondo_core::{MachineKey, MetaContext, Pick, SelectionPolicy};
use std::sync::Arc;

fn rank(
    policy: SelectionPolicy,
    control: &MachineControl,
    clock: u64,
    meta: &dyn MetaContext,
) -> Option<u64> {
    control.with_condition(|condition| match policy {
        SelectionPolicy::MinIssueTime => Some(condition.issue_time),
        SelectionPolicy::MinIssueTimeAndFulfilled => condition
            .is_fulfilled(clock, meta)
            .then_some(condition.issue_time),
        // Never-run machines rank before everyone else
        SelectionPolicy::Fairness => condition
            .is_fulfilled(clock, meta)
            .then(|| control.last_execution().map_or(0, |at| at.saturating_add(1))),
    })
}

/// Pick the next machine to admit from `controls`, given in key order
pub(crate) fn select(
    policy: SelectionPolicy,
    controls: &[Arc<MachineControl>],
    clock: u64,
    meta: &dyn MetaContext,
    tie_break: Pick,
    rng: &mut ChaCha8Rng,
) -> Option<MachineKey> {
    let mut best: Option<u64> = None;
    let mut tied: Vec<&MachineKey> = Vec::new();
    for control in controls {
        let Some(rank) = rank(policy, control, clock, meta) else {
            continue;
        };
        match best {
            Some(current) if rank > current => {}
            Some(current) if rank == current => tied.push(control.key()),
            _ => {
                best = Some(rank);
                tied.clear();
                tied.push(control.key());
            }
        }
    }

    let chosen = match (tie_break, tied.len()) {
        (_, 0) => return None,
        (Pick::First, _) | (Pick::Random, 1) => tied[0],
        (Pick::Random, n) => tied[rng.gen_range(0..n)],
    };
    tracing::debug!(?policy, machine = %chosen, clock, candidates = tied.len(), "selected");
    Some(chosen.clone())
}
