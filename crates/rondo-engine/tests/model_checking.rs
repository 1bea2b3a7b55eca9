//! Choice-point recording and replay

use rondo_core::{EngineConfig, MachineKey, VerificationMode};
use rondo_engine::{Explorer, Replay, Scenario, Status};
use rondo_testkit::{
    admission_keys, assert_clean, assert_mutual_exclusion, init_test_tracing, start_yielders,
    Alternation, KvSpace, ProducerConsumer, RacyCounter,
};
use std::sync::Arc;

struct FourYielders;

impl Scenario for FourYielders {
    fn name(&self) -> &str {
        "four-yielders"
    }

    fn description(&self) -> &str {
        "four machines yielding with branch generation"
    }

    fn meta(&self) -> Box<dyn rondo_core::MetaContext> {
        Box::new(KvSpace::new())
    }

    fn setup(&self, status: &Arc<Status>) -> rondo_core::Result<()> {
        start_yielders(status, &["a", "b", "c", "d"], None)
    }
}

fn model_checking(max_runs: Option<u64>) -> EngineConfig {
    EngineConfig::default().with_mode(VerificationMode::ModelChecking { max_runs })
}

/// First recorded choice point with exactly `alternatives` candidates
fn choice_point_with(explorer: &Explorer<'_>, alternatives: usize) -> Option<Vec<Replay>> {
    explorer.session().with_vars(|vars| {
        vars.choice_points
            .iter()
            .find(|point| point.candidates().len() == alternatives)
            .map(|point| {
                point
                    .candidates()
                    .iter()
                    .map(|candidate| Replay {
                        choice_point: point.id,
                        candidate: candidate.clone(),
                        depth: point.depth,
                        clock: point.clock,
                        event_clock: point.event_clock,
                        snapshot: Arc::clone(point.snapshot()),
                    })
                    .collect()
            })
    })
}

#[test]
fn replays_start_with_the_forced_candidate_and_are_deterministic() {
    init_test_tracing();
    let scenario = FourYielders;
    let explorer = Explorer::new(model_checking(None).with_ttl(16), &scenario).unwrap();
    let initial = explorer.prepare(0).unwrap();
    let report = explorer.execute(&initial).unwrap();
    assert!(report.choice_points > 0);
    assert!(report.forced.is_none());

    let replays = choice_point_with(&explorer, 3).expect("a decision with three alternatives");
    for replay in &replays {
        let mut admissions = Vec::new();
        for _ in 0..2 {
            explorer.session().prepare_replay(replay);
            let copy = replay.snapshot.clone_for_new_run();
            assert_eq!(copy.now(), replay.clock);
            let run = explorer.execute(&copy).unwrap();

            assert_eq!(run.forced.as_ref(), Some(&replay.candidate));
            assert_eq!(run.admissions.first(), Some(&replay.candidate));
            assert_eq!(run.max_holders, 1);
            admissions.push(admission_keys(&run));
        }
        assert_eq!(admissions[0], admissions[1], "replay of {} diverged", replay.candidate);
    }
    explorer.session().with_vars(|vars| vars.choice_points.clear());
}

#[test]
fn clones_of_one_snapshot_are_equal_and_independent() {
    init_test_tracing();
    let scenario = FourYielders;
    let explorer = Explorer::new(model_checking(None).with_ttl(12), &scenario).unwrap();
    let initial = explorer.prepare(0).unwrap();
    explorer.execute(&initial).unwrap();

    let snapshot = explorer
        .session()
        .with_vars(|vars| vars.choice_points.iter().next().map(|point| Arc::clone(point.snapshot())))
        .expect("at least one choice point");
    let first = snapshot.clone_for_new_run();
    let second = snapshot.clone_for_new_run();
    assert_eq!(first.view(), second.view());
    assert_eq!(first.view(), snapshot.view());

    first
        .with_domain_mut::<KvSpace, _>(|space| space.set("turns", 1000))
        .unwrap();
    let key = MachineKey::from("a#0");
    first
        .control(&key)
        .unwrap()
        .machine()
        .with_locals(|locals| locals.set("turns", 1000));

    assert_ne!(first.view(), second.view());
    assert_eq!(second.view(), snapshot.view());
    assert_ne!(
        second.with_domain::<KvSpace, _>(|space| space.get("turns")).unwrap(),
        1000
    );
    explorer.session().with_vars(|vars| vars.choice_points.clear());
}

#[test]
fn exploration_finds_both_outcomes_of_the_racy_counter() {
    init_test_tracing();
    let scenario = RacyCounter {
        workers: 2,
        increments: 1,
    };
    let report = Explorer::new(model_checking(Some(64)), &scenario)
        .unwrap()
        .run()
        .unwrap();

    assert!(report.runs.len() >= 2, "{report}");
    assert!(report.runs[0].forced.is_none());
    assert!(report.runs[1..].iter().all(|run| run.forced.is_some()));
    assert!(report.runs.iter().any(|run| !run.violations.is_empty()));
    assert!(report.runs.iter().any(|run| run.violations.is_empty()));
    assert!(!report.is_clean());
    assert_mutual_exclusion(&report);
}

#[test]
fn correct_protocols_stay_clean_under_exploration() {
    init_test_tracing();
    let scenario = ProducerConsumer { items: 2 };
    let report = Explorer::new(model_checking(Some(40)), &scenario)
        .unwrap()
        .run()
        .unwrap();

    assert!(report.runs.len() > 1);
    assert_mutual_exclusion(&report);
    assert_clean!(report);
}

#[test]
fn run_budget_leaves_branches_unexplored() {
    init_test_tracing();
    let scenario = Alternation { rounds: None };
    let report = Explorer::new(model_checking(Some(1)).with_ttl(10), &scenario)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.runs.len(), 1);
    assert!(report.unexplored > 0);
    assert!(!report.exhausted());
}

#[test]
fn single_runs_record_no_choice_points() {
    init_test_tracing();
    let scenario = FourYielders;
    let explorer = Explorer::new(EngineConfig::default().with_ttl(12), &scenario).unwrap();
    let status = explorer.prepare(0).unwrap();
    let report = explorer.execute(&status).unwrap();

    assert_eq!(report.choice_points, 0);
    assert!(explorer.session().with_vars(|vars| vars.choice_points.is_empty()));
}
