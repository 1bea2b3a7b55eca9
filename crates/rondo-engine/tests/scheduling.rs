//! End-to-end scheduling behaviour of single runs
//!
//! Every run goes through the real controller and machine threads; results
//! are read back from run reports and the final domain state.

use assert_matches::assert_matches;
use proptest::prelude::*;
use rondo_core::{
    ConditionKind, EngineConfig, EngineError, MetaContext, Result, Signal, SignalKind, StateId,
    TargetTime, UserEvent, VerificationMode, WaitRequest,
};
use rondo_engine::{
    Automaton, Explorer, HandlerOutcome, LocalVars, MachineContext, RunReport, Scenario, Status,
    TerminationReason,
};
use rondo_testkit::{
    admission_keys, assert_clean, assert_mutual_exclusion, assert_reason, init_test_tracing,
    max_admission_gap, start_yielders, Alternation, KvSpace, ProducerConsumer, RacyCounter,
    Sleepers, TimedDeposits,
};
use std::sync::Arc;

const START: StateId = StateId(0);
const AGAIN: StateId = StateId(1);

struct Custom<F> {
    name: &'static str,
    setup: F,
}

fn custom<F>(name: &'static str, setup: F) -> Custom<F>
where
    F: Fn(&Arc<Status>) -> Result<()> + Send + Sync,
{
    Custom { name, setup }
}

impl<F> Scenario for Custom<F>
where
    F: Fn(&Arc<Status>) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "inline test scenario"
    }

    fn meta(&self) -> Box<dyn MetaContext> {
        Box::new(KvSpace::new())
    }

    fn setup(&self, status: &Arc<Status>) -> Result<()> {
        (self.setup)(status)
    }
}

/// Run `scenario` once and hand back the report with the final state
fn run_once(config: EngineConfig, scenario: &dyn Scenario) -> (Result<RunReport>, Arc<Status>) {
    init_test_tracing();
    let explorer = Explorer::new(config, scenario).unwrap();
    let status = explorer.prepare(0).unwrap();
    (explorer.execute(&status), status)
}

fn space_value(status: &Status, key: &str) -> i64 {
    status.with_domain::<KvSpace, _>(|space| space.get(key)).unwrap()
}

#[test]
fn two_yielders_alternate_under_fairness() {
    let scenario = Alternation { rounds: None };
    let (report, _) = run_once(EngineConfig::default().with_ttl(12), &scenario);
    let report = report.unwrap();

    assert_eq!(
        admission_keys(&report)[..4],
        ["x#0", "y#1", "x#0", "y#1"].map(String::from)
    );
    assert_eq!(report.reason, TerminationReason::TtlExceeded(12));
    assert_reason!(report, "SYSTEM TTL 12 exceeded");
    assert_eq!(report.clock, 12);
    assert_eq!(report.admissions.len(), 12);
    assert_eq!(max_admission_gap(&report.admissions), 1);
    assert!(report.violations.is_empty());
}

#[test]
fn run_completes_when_every_machine_exits() {
    let scenario = Alternation { rounds: Some(2) };
    let (report, status) = run_once(EngineConfig::default(), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "COMPLETED");
    // launch, then one admission per turn
    assert_eq!(report.admissions.len(), 6);
    assert_eq!(report.clock, 6);
    assert_eq!(report.terminated, 2);
    assert_eq!(space_value(&status, "turns.x"), 2);
    assert_eq!(space_value(&status, "turns.y"), 2);
    assert_eq!(status.live_count(), 0);
}

#[test]
fn never_fulfilled_event_ends_at_the_time_to_live() {
    let scenario = custom("waiter", |status| {
        let automaton = Automaton::builder("waiter")
            .state(START, "wait for an event nobody sends", |status, machine| {
                if !machine.wait_for_event(status, UserEvent::named("never"), false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                Ok(HandlerOutcome::Exit)
            })
            .build()?;
        status.register_automaton(automaton)?;
        status.start_machine("waiter", "waiter", LocalVars::new(), MachineContext::default())?;
        Ok(())
    });
    let (report, status) = run_once(EngineConfig::default().with_ttl(5), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "SYSTEM TTL 5 exceeded");
    assert_eq!(report.clock, 5);
    assert_eq!(admission_keys(&report), ["waiter#0"]);
    assert_eq!(report.terminated, 1);
    assert_eq!(status.live_count(), 0);
}

#[test]
fn matched_event_with_a_future_target_wakes_at_the_target() {
    let scenario = custom("deadline", |status| {
        status.with_domain_mut::<KvSpace, _>(|space| space.set("go", 1))?;
        let automaton = Automaton::builder("deadline")
            .state(START, "wait for go, but not before 10", |status, machine| {
                let request = WaitRequest::user_event(UserEvent::named("go"), TargetTime::At(10));
                if !machine.wait(status, request)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                let now = status.now();
                status.with_domain_mut::<KvSpace, _>(|space| space.set("woke", now as i64))?;
                Ok(HandlerOutcome::Exit)
            })
            .build()?;
        status.register_automaton(automaton)?;
        status.start_machine("w", "deadline", LocalVars::new(), MachineContext::default())?;
        Ok(())
    });
    let (report, status) = run_once(EngineConfig::default().with_ttl(50), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "COMPLETED");
    assert_eq!(admission_keys(&report), ["w#0", "w#0"]);
    assert_eq!(space_value(&status, "woke"), 11);
    assert_eq!(report.clock, 11);
}

#[test]
fn resumed_wait_sees_a_cleared_condition_and_its_admission_time() {
    let scenario = custom("round-trip", |status| {
        let automaton = Automaton::builder("sleeper")
            .state(START, "sleep until 5, then inspect the control", |status, machine| {
                if !machine.wait_for_time(status, TargetTime::At(5), false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                let control = machine.control().cloned();
                let now = status.now();
                let tick = status.config().tick;
                let cleared = control
                    .as_ref()
                    .is_some_and(|control| control.condition().kind == ConditionKind::None);
                let admitted_at = control.and_then(|control| control.last_execution());
                status.with_domain_mut::<KvSpace, _>(|space| {
                    space.set("cleared", i64::from(cleared));
                    space.set("admission_matches", i64::from(admitted_at == Some(now - tick)));
                    space.set("woke", now as i64);
                })?;
                Ok(HandlerOutcome::Exit)
            })
            .build()?;
        status.register_automaton(automaton)?;
        status.start_machine("sleeper", "sleeper", LocalVars::new(), MachineContext::default())?;
        Ok(())
    });
    let (report, status) = run_once(EngineConfig::default(), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "COMPLETED");
    assert_eq!(space_value(&status, "cleared"), 1);
    assert_eq!(space_value(&status, "admission_matches"), 1);
    assert_eq!(space_value(&status, "woke"), 6);
}

#[test]
fn sleepers_wake_in_time_order_after_jumps() {
    let scenario = Sleepers { count: 3, step: 10 };
    let (report, _) = run_once(EngineConfig::default(), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "COMPLETED");
    assert_eq!(
        admission_keys(&report),
        ["sleeper#0", "sleeper#1", "sleeper#2", "sleeper#2", "sleeper#1", "sleeper#0"]
    );
    assert_eq!(report.clock, 31);
    assert!(report.violations.is_empty(), "{:?}", report.violations);
}

#[test]
fn scheduled_slots_feed_a_waiting_machine() {
    let scenario = TimedDeposits { at: vec![3, 7, 12] };
    let (report, status) = run_once(EngineConfig::default(), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "COMPLETED");
    assert_eq!(space_value(&status, "collected"), 3);
    assert_eq!(space_value(&status, "last_collected_at"), 13);
    assert_eq!(report.clock, 13);
    assert_eq!(status.with_scheduler(|scheduler| scheduler.pending_work()), 0);
}

#[test]
fn consumer_takes_every_produced_item() {
    let scenario = ProducerConsumer { items: 3 };
    let (report, status) = run_once(EngineConfig::default(), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "COMPLETED");
    assert_eq!(space_value(&status, "produced"), 3);
    assert_eq!(space_value(&status, "consumed"), 3);
    assert_eq!(space_value(&status, "items"), 0);
    assert!(report.violations.is_empty());
}

#[test]
fn default_interleaving_of_the_racy_counter_loses_an_update() {
    let scenario = RacyCounter {
        workers: 2,
        increments: 1,
    };
    let (report, status) = run_once(EngineConfig::default(), &scenario);
    let report = report.unwrap();

    assert_reason!(report, "COMPLETED");
    assert_eq!(space_value(&status, "counter"), 1);
    assert_eq!(report.violations.len(), 1);
}

#[test]
fn stop_from_a_handler_unwinds_every_machine() {
    let scenario = custom("stopper", |status| {
        let automaton = Automaton::builder("stopper")
            .state(START, "stop the run on the third turn", |status, machine| {
                if !machine.wait_nothing(status, false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                if machine.with_locals(|locals| locals.increment("turns")) == 3 {
                    status.request_stop(machine.key().as_str())?;
                }
                Ok(HandlerOutcome::Continue)
            })
            .build()?;
        status.register_automaton(automaton)?;
        status.start_machine("stopper", "stopper", LocalVars::new(), MachineContext::default())?;
        start_yielders(status, &["bystander"], None)
    });
    let (report, status) = run_once(EngineConfig::default(), &scenario);
    let report = report.unwrap();

    assert_eq!(report.reason, TerminationReason::User);
    assert_eq!(report.terminated, 2);
    assert_eq!(status.live_count(), 0);
    assert!(status.is_stopping());
}

#[test]
fn waiting_inside_a_synchronous_machine_aborts_the_run() {
    let scenario = custom("sync-wait", |status| {
        let helper = Automaton::builder("helper")
            .state(START, "illegally yield", |status, machine| {
                machine.wait_nothing(status, false)?;
                Ok(HandlerOutcome::Exit)
            })
            .build()?;
        let caller = Automaton::builder("caller")
            .state(START, "call the helper inline", |status, machine| {
                if !machine.wait_nothing(status, false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                status.call_machine("helper", "helper", LocalVars::new(), MachineContext::default())?;
                Ok(HandlerOutcome::Exit)
            })
            .build()?;
        status.register_automaton(helper)?;
        status.register_automaton(caller)?;
        status.start_machine("caller", "caller", LocalVars::new(), MachineContext::default())?;
        start_yielders(status, &["bystander"], None)
    });
    let (report, status) = run_once(EngineConfig::default(), &scenario);

    assert_matches!(report, Err(EngineError::ProtocolViolation { .. }));
    assert_eq!(status.live_count(), 0);
}

#[test]
fn synchronous_machines_run_inline_and_return_their_locals() {
    init_test_tracing();
    let scenario = Alternation { rounds: Some(1) };
    let explorer = Explorer::new(EngineConfig::default(), &scenario).unwrap();
    let status = explorer.prepare(0).unwrap();
    let automaton = Automaton::builder("double")
        .state(START, "double the input", |_, machine| {
            machine.with_locals(|locals| {
                let input = locals.get_u64("input").unwrap_or(0);
                locals.set("output", input * 2);
            });
            machine.goto(AGAIN);
            Ok(HandlerOutcome::Continue)
        })
        .state(AGAIN, "done", |_, _| Ok(HandlerOutcome::Exit))
        .build()
        .unwrap();
    status.register_automaton(automaton).unwrap();

    let mut locals = LocalVars::new();
    locals.set("input", 21);
    let (outcome, locals) = status
        .call_machine("double", "double", locals, MachineContext::default())
        .unwrap();

    assert_eq!(outcome, HandlerOutcome::Exit);
    assert_eq!(locals.get_u64("output"), Some(42));
    assert_eq!(status.live_count(), 2, "synchronous machines are never registered");
}

#[test]
fn panicking_handler_becomes_an_internal_error() {
    let scenario = custom("panic", |status| {
        let automaton = Automaton::builder("faulty")
            .state(START, "panic once admitted", |status, machine| {
                if !machine.wait_nothing(status, false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                panic!("handler bug");
            })
            .build()?;
        status.register_automaton(automaton)?;
        status.start_machine("faulty", "faulty", LocalVars::new(), MachineContext::default())?;
        Ok(())
    });
    let (report, _) = run_once(EngineConfig::default(), &scenario);
    assert_matches!(report, Err(EngineError::Internal { .. }));
}

#[test]
fn undeclared_state_is_a_protocol_violation() {
    let scenario = custom("bad-goto", |status| {
        let automaton = Automaton::builder("lost")
            .state(START, "jump nowhere", |status, machine| {
                if !machine.wait_nothing(status, false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                machine.goto(StateId(99));
                Ok(HandlerOutcome::Continue)
            })
            .build()?;
        status.register_automaton(automaton)?;
        status.start_machine("lost", "lost", LocalVars::new(), MachineContext::default())?;
        Ok(())
    });
    let (report, _) = run_once(EngineConfig::default(), &scenario);
    assert_matches!(report, Err(EngineError::ProtocolViolation { .. }));
}

#[test]
fn unexpected_signal_on_the_inbound_queue_aborts_the_run() {
    let scenario = custom("rogue", |status| {
        let automaton = Automaton::builder("rogue")
            .state(START, "post an admission to the controller", |status, machine| {
                if !machine.wait_nothing(status, false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                status.send(Signal::system(SignalKind::Enter, "rogue"))?;
                Ok(HandlerOutcome::Continue)
            })
            .build()?;
        status.register_automaton(automaton)?;
        status.start_machine("rogue", "rogue", LocalVars::new(), MachineContext::default())?;
        Ok(())
    });
    let (report, status) = run_once(EngineConfig::default(), &scenario);

    assert_matches!(
        report,
        Err(EngineError::ProtocolViolation { ref machine, .. }) if machine == "controller"
    );
    assert_matches!(status.fatal(), Some(EngineError::ProtocolViolation { .. }));
    assert_eq!(status.live_count(), 0);
}

#[test]
fn simulation_seeds_vary_the_interleaving_by_default() {
    init_test_tracing();
    let config = EngineConfig::default().with_mode(VerificationMode::Simulation { runs: 8 });
    let scenario = RacyCounter {
        workers: 3,
        increments: 2,
    };
    let report = Explorer::new(config, &scenario).unwrap().run().unwrap();

    let mut orders: Vec<Vec<String>> = report.runs.iter().map(admission_keys).collect();
    assert_eq!(orders.len(), 8);
    orders.sort();
    orders.dedup();
    assert!(orders.len() > 1, "every seed produced {:?}", orders[0]);
    assert_mutual_exclusion(&report);
}

#[test]
fn simulation_runs_every_seed_once() {
    init_test_tracing();
    let config = EngineConfig::default().with_mode(VerificationMode::Simulation { runs: 3 });
    let scenario = Alternation { rounds: Some(3) };
    let report = Explorer::new(config, &scenario).unwrap().run().unwrap();

    assert_eq!(report.runs.len(), 3);
    assert_eq!(
        report.runs.iter().map(|run| run.run).collect::<Vec<_>>(),
        [1, 2, 3]
    );
    assert!(report
        .runs
        .iter()
        .all(|run| run.reason == TerminationReason::Completed));
    assert_mutual_exclusion(&report);
    assert_clean!(report);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn fairness_bounds_the_wait_between_turns(machines in 2usize..6, ttl in 20u64..60) {
        let names: Vec<String> = (0..machines).map(|i| format!("m{i}")).collect();
        let scenario = custom("fairness", move |status| {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            start_yielders(status, &names, None)
        });
        let (report, _) = run_once(EngineConfig::default().with_ttl(ttl), &scenario);
        let report = report.unwrap();

        prop_assert_eq!(report.max_holders, 1);
        prop_assert!(max_admission_gap(&report.admissions) <= machines - 1);
        prop_assert_eq!(report.admissions.len() as u64, ttl);
    }
}
