//! Choice points for model checking
//!
//! A [`ChoicePoint`] keeps the candidates the controller did not pick at one
//! decision, together with a full copy of the run taken just before that
//! decision. The replay driver consumes candidates one at a time; each one
//! becomes a new run whose first decision is forced to that candidate.

use crate::status::Status;
use indexmap::IndexMap;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rondo_core::{EngineError, MachineKey, ModelCheckingCriteria, Pick, Result};
use std::fmt;
use std::sync::Arc;

/// A recorded branch
pub struct ChoicePoint {
    /// Numeric id, unique within a session
    pub id: u64,
    /// Path depth at which the branch was recorded
    pub depth: u64,
    /// Virtual time of the decision
    pub clock: u64,
    /// Event time of the decision
    pub event_clock: u64,
    candidates: Vec<MachineKey>,
    snapshot: Arc<Status>,
}

impl ChoicePoint {
    /// Candidates not yet replayed, in key order
    pub fn candidates(&self) -> &[MachineKey] {
        &self.candidates
    }

    /// Copy of the run taken before the decision
    pub fn snapshot(&self) -> &Arc<Status> {
        &self.snapshot
    }

    fn take_candidate(&mut self, pick: Pick, rng: &mut ChaCha8Rng) -> Option<MachineKey> {
        if self.candidates.is_empty() {
            return None;
        }
        let index = match pick {
            Pick::First => 0,
            Pick::Random => rng.gen_range(0..self.candidates.len()),
        };
        Some(self.candidates.remove(index))
    }
}

impl fmt::Debug for ChoicePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChoicePoint")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("clock", &self.clock)
            .field("event_clock", &self.event_clock)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

/// Everything needed to start one replay
#[derive(Debug, Clone)]
pub struct Replay {
    /// Choice point the candidate was taken from
    pub choice_point: u64,
    /// Machine the first decision is forced to
    pub candidate: MachineKey,
    /// Path depth of the choice point
    pub depth: u64,
    /// Virtual time to restore
    pub clock: u64,
    /// Event time to restore
    pub event_clock: u64,
    /// Run copy to clone the replay from
    pub snapshot: Arc<Status>,
}

/// Ordered list of unexplored choice points
#[derive(Debug, Default)]
pub struct ChoicePoints {
    points: IndexMap<u64, ChoicePoint>,
}

impl ChoicePoints {
    /// Number of choice points with candidates left
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether everything recorded has been explored
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Choice points in recording order
    pub fn iter(&self) -> impl Iterator<Item = &ChoicePoint> {
        self.points.values()
    }

    /// Choice point `id`
    pub fn get(&self, id: u64) -> Option<&ChoicePoint> {
        self.points.get(&id)
    }

    /// Drop every choice point
    pub fn clear(&mut self) {
        self.points.clear();
    }

    fn push(&mut self, point: ChoicePoint) {
        self.points.insert(point.id, point);
    }

    /// Id of the choice point to explore next; `first` is the most recent
    fn pick(&self, pick: Pick, rng: &mut ChaCha8Rng) -> Option<u64> {
        match pick {
            Pick::First => self.points.last().map(|(id, _)| *id),
            Pick::Random if self.points.is_empty() => None,
            Pick::Random => self
                .points
                .get_index(rng.gen_range(0..self.points.len()))
                .map(|(id, _)| *id),
        }
    }

    /// Remove one candidate of choice point `id`, dropping the point once its
    /// candidates run out
    fn take(&mut self, id: u64, pick: Pick, rng: &mut ChaCha8Rng) -> Result<Replay> {
        let point = self
            .points
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("choice point {id}")))?;
        let candidate = point.take_candidate(pick, rng).ok_or_else(|| {
            EngineError::protocol("controller", format!("choice point {id} has no candidates left"))
        })?;
        let replay = Replay {
            choice_point: id,
            candidate,
            depth: point.depth,
            clock: point.clock,
            event_clock: point.event_clock,
            snapshot: Arc::clone(&point.snapshot),
        };
        if point.candidates.is_empty() {
            self.points.shift_remove(&id);
        }
        Ok(replay)
    }
}

/// Bookkeeping shared between the controller and the replay driver
#[derive(Debug, Default)]
pub struct ModelCheckingVars {
    /// Unexplored choice points
    pub choice_points: ChoicePoints,
    /// Depth of the current path
    pub depth: u64,
    /// Choice point the current run was replayed from
    pub current: Option<u64>,
    /// Candidate the current run's first decision is forced to
    pub chosen: Option<MachineKey>,
    /// Whether the forced decision is still pending
    pub recovering: bool,
    next_id: u64,
}

impl ModelCheckingVars {
    /// Append a new choice point and return its id
    pub(crate) fn record(
        &mut self,
        candidates: Vec<MachineKey>,
        snapshot: Arc<Status>,
        clock: u64,
        event_clock: u64,
    ) -> u64 {
        self.depth += 1;
        let id = self.next_id;
        self.next_id += 1;
        self.choice_points.push(ChoicePoint {
            id,
            depth: self.depth,
            clock,
            event_clock,
            candidates,
            snapshot,
        });
        id
    }

    /// Take the next replay according to `criteria`
    pub fn next_replay(
        &mut self,
        criteria: ModelCheckingCriteria,
        rng: &mut ChaCha8Rng,
    ) -> Result<Option<Replay>> {
        let Some(id) = self.choice_points.pick(criteria.choice_point, rng) else {
            return Ok(None);
        };
        self.choice_points.take(id, criteria.candidate, rng).map(Some)
    }

    /// Arm the forced decision of `replay`
    pub fn arm(&mut self, replay: &Replay) {
        self.depth = replay.depth;
        self.current = Some(replay.choice_point);
        self.chosen = Some(replay.candidate.clone());
        self.recovering = true;
    }

    /// Consume the forced decision, if one is armed
    pub(crate) fn take_forced(&mut self) -> Option<MachineKey> {
        if !self.recovering {
            return None;
        }
        self.recovering = false;
        self.chosen.clone()
    }

    /// Back to the state of a fresh session
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use rand::SeedableRng;
    use rondo_core::{EngineConfig, NoopSlotProcessor, NullMeta};

    fn snapshot() -> Arc<Status> {
        Status::new(
            EngineConfig::default(),
            Arc::new(Session::new()),
            Box::new(NullMeta),
            Arc::new(NoopSlotProcessor),
        )
        .unwrap()
    }

    fn keys(names: &[&str]) -> Vec<MachineKey> {
        names.iter().map(|name| MachineKey::from(*name)).collect()
    }

    #[test]
    fn candidates_are_consumed_in_order_then_the_point_disappears() {
        let mut vars = ModelCheckingVars::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        vars.record(keys(&["a#0", "b#1", "c#2"]), snapshot(), 4, 9);

        let mut taken = Vec::new();
        while let Some(replay) = vars
            .next_replay(ModelCheckingCriteria::default(), &mut rng)
            .unwrap()
        {
            assert_eq!((replay.clock, replay.event_clock, replay.depth), (4, 9, 1));
            taken.push(replay.candidate.as_str().to_string());
        }
        assert_eq!(taken, vec!["a#0", "b#1", "c#2"]);
        assert!(vars.choice_points.is_empty());
    }

    #[test]
    fn first_choice_point_is_the_most_recent() {
        let mut vars = ModelCheckingVars::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        vars.record(keys(&["a#0"]), snapshot(), 1, 1);
        let newer = vars.record(keys(&["b#1"]), snapshot(), 2, 2);

        let replay = vars
            .next_replay(ModelCheckingCriteria::default(), &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(replay.choice_point, newer);
        assert_eq!(replay.depth, 2);
        assert_eq!(vars.choice_points.len(), 1);
    }

    #[test]
    fn forced_decision_is_consumed_once() {
        let mut vars = ModelCheckingVars::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        vars.record(keys(&["a#0", "b#1"]), snapshot(), 3, 3);
        let replay = vars
            .next_replay(ModelCheckingCriteria::default(), &mut rng)
            .unwrap()
            .unwrap();
        vars.arm(&replay);
        assert_eq!(vars.take_forced(), Some(MachineKey::from("a#0")));
        assert_eq!(vars.take_forced(), None);
    }

    #[test]
    fn taking_from_an_exhausted_point_is_a_protocol_violation() {
        let mut points = ChoicePoints::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        points.push(ChoicePoint {
            id: 7,
            depth: 1,
            clock: 0,
            event_clock: 0,
            candidates: Vec::new(),
            snapshot: snapshot(),
        });
        let err = points.take(7, Pick::First, &mut rng).unwrap_err();
        assert!(err.is_protocol_violation());
    }
}
