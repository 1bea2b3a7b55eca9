//! Ready-made scenarios
//!
//! Every state handler follows the same shape: wait first, then act on the
//! shared space, then pick the next state. A machine resumed from a choice
//! point re-runs its current state from the top, so the wait is the only
//! thing it repeats.

use crate::space::{KvSlotProcessor, KvSpace};
use rondo_core::{MetaContext, Result, SlotPayload, SlotProcessor, StateId, TargetTime, UserEvent};
use rondo_engine::{Automaton, HandlerOutcome, LocalVars, MachineContext, Scenario, Status};
use serde_json::json;
use std::sync::Arc;

const LOOP: StateId = StateId(0);
const WRITE: StateId = StateId(1);

/// Automaton that yields with `generate_choice` set and counts its turns in
/// the space under `turns` and `turns.<name>`. Exits after `rounds` turns when given.
pub fn yielder(rounds: Option<u64>) -> Result<Arc<Automaton>> {
    Automaton::builder("yielder")
        .state(LOOP, "yield, then count the turn", move |status, machine| {
            if !machine.wait_nothing(status, true)? {
                return Ok(HandlerOutcome::Stopped);
            }
            let name = machine.machine().name().to_string();
            status.with_domain_mut::<KvSpace, _>(|space| {
                space.add("turns", 1);
                space.add(&format!("turns.{name}"), 1);
            })?;
            let turns = machine.with_locals(|locals| locals.increment("turns"));
            if rounds.is_some_and(|rounds| turns >= rounds) {
                return Ok(HandlerOutcome::Exit);
            }
            Ok(HandlerOutcome::Continue)
        })
        .build()
}

/// Start one yielder machine per name
pub fn start_yielders(status: &Arc<Status>, names: &[&str], rounds: Option<u64>) -> Result<()> {
    status.register_automaton(yielder(rounds)?)?;
    for name in names {
        status.start_machine(name, "yielder", LocalVars::new(), MachineContext::default())?;
    }
    Ok(())
}

fn counter(status: &Status, key: &str) -> i64 {
    status
        .with_domain::<KvSpace, _>(|space| space.get(key))
        .unwrap_or(0)
}

/// Machines `x` and `y` yielding in turn
#[derive(Debug, Clone)]
pub struct Alternation {
    /// Turns per machine; `None` loops until the run ends
    pub rounds: Option<u64>,
}

impl Scenario for Alternation {
    fn name(&self) -> &str {
        "alternation"
    }

    fn description(&self) -> &str {
        "two machines yielding the critical section to each other"
    }

    fn meta(&self) -> Box<dyn MetaContext> {
        Box::new(KvSpace::new())
    }

    fn setup(&self, status: &Arc<Status>) -> Result<()> {
        start_yielders(status, &["x", "y"], self.rounds)
    }

    fn check(&self, status: &Status) -> Vec<String> {
        let (x, y) = (counter(status, "turns.x"), counter(status, "turns.y"));
        if (x - y).abs() > 1 {
            vec![format!("turns drifted apart: x={x}, y={y}")]
        } else {
            Vec::new()
        }
    }
}

/// Machines sleeping until staggered virtual times
#[derive(Debug, Clone)]
pub struct Sleepers {
    /// Number of sleepers
    pub count: u64,
    /// Distance between wake-up times
    pub step: u64,
}

impl Scenario for Sleepers {
    fn name(&self) -> &str {
        "sleepers"
    }

    fn description(&self) -> &str {
        "machines waiting for staggered virtual times"
    }

    fn meta(&self) -> Box<dyn MetaContext> {
        Box::new(KvSpace::new())
    }

    fn setup(&self, status: &Arc<Status>) -> Result<()> {
        let automaton = Automaton::builder("sleeper")
            .state(LOOP, "sleep until the wake-up time", |status, machine| {
                let wake_at = machine
                    .with_locals(|locals| locals.get_u64("wake_at"))
                    .unwrap_or(0);
                if !machine.wait_for_time(status, TargetTime::At(wake_at), false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                let now = i64::try_from(status.now()).unwrap_or(i64::MAX);
                let key = machine.key().to_string();
                status.with_domain_mut::<KvSpace, _>(|space| {
                    space.set(&format!("woke.{key}"), now);
                    space.set(&format!("due.{key}"), i64::try_from(wake_at).unwrap_or(i64::MAX));
                })?;
                Ok(HandlerOutcome::Exit)
            })
            .build()?;
        status.register_automaton(automaton)?;
        for i in 0..self.count {
            let mut locals = LocalVars::new();
            locals.set("wake_at", (self.count - i) * self.step);
            status.start_machine("sleeper", "sleeper", locals, MachineContext::default())?;
        }
        Ok(())
    }

    fn check(&self, status: &Status) -> Vec<String> {
        status
            .with_domain::<KvSpace, _>(|space| {
                space
                    .iter()
                    .filter_map(|(key, woke)| {
                        let machine = key.strip_prefix("woke.")?;
                        let due = space.get(&format!("due.{machine}"));
                        (woke < due).then(|| format!("{machine} woke at {woke}, due {due}"))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One producer depositing items, one consumer waiting for them
#[derive(Debug, Clone)]
pub struct ProducerConsumer {
    /// Items to move
    pub items: u64,
}

impl Scenario for ProducerConsumer {
    fn name(&self) -> &str {
        "producer-consumer"
    }

    fn description(&self) -> &str {
        "a consumer waiting on a user event fed by a producer"
    }

    fn meta(&self) -> Box<dyn MetaContext> {
        Box::new(KvSpace::new())
    }

    fn setup(&self, status: &Arc<Status>) -> Result<()> {
        let items = self.items;
        let producer = Automaton::builder("producer")
            .state(LOOP, "yield, then deposit one item", move |status, machine| {
                if !machine.wait_nothing(status, true)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                status.with_domain_mut::<KvSpace, _>(|space| {
                    space.add("items", 1);
                    space.add("produced", 1);
                })?;
                let produced = machine.with_locals(|locals| locals.increment("produced"));
                Ok(if produced >= items {
                    HandlerOutcome::Exit
                } else {
                    HandlerOutcome::Continue
                })
            })
            .build()?;
        let consumer = Automaton::builder("consumer")
            .state(LOOP, "wait for an item, then take it", move |status, machine| {
                if !machine.wait_for_event(status, UserEvent::named("items"), true)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                let took = status.with_domain_mut::<KvSpace, _>(|space| {
                    let took = space.take("items");
                    if took {
                        space.add("consumed", 1);
                    }
                    took
                })?;
                if !took {
                    return Ok(HandlerOutcome::Continue);
                }
                let consumed = machine.with_locals(|locals| locals.increment("consumed"));
                Ok(if consumed >= items {
                    HandlerOutcome::Exit
                } else {
                    HandlerOutcome::Continue
                })
            })
            .build()?;
        status.register_automaton(producer)?;
        status.register_automaton(consumer)?;
        status.start_machine("consumer", "consumer", LocalVars::new(), MachineContext::default())?;
        status.start_machine("producer", "producer", LocalVars::new(), MachineContext::default())?;
        Ok(())
    }

    fn check(&self, status: &Status) -> Vec<String> {
        let produced = counter(status, "produced");
        let consumed = counter(status, "consumed");
        let items = counter(status, "items");
        let mut violations = Vec::new();
        if consumed > produced {
            violations.push(format!("consumed {consumed} of {produced} produced items"));
        }
        if items != produced - consumed {
            violations.push(format!(
                "{items} items in the space, expected {}",
                produced - consumed
            ));
        }
        violations
    }
}

/// Workers incrementing a shared counter through a private register, with a
/// yield between the load and the store
#[derive(Debug, Clone)]
pub struct RacyCounter {
    /// Number of workers
    pub workers: u64,
    /// Increments per worker
    pub increments: u64,
}

impl Scenario for RacyCounter {
    fn name(&self) -> &str {
        "racy-counter"
    }

    fn description(&self) -> &str {
        "non-atomic read-modify-write; some interleavings lose updates"
    }

    fn meta(&self) -> Box<dyn MetaContext> {
        Box::new(KvSpace::new())
    }

    fn setup(&self, status: &Arc<Status>) -> Result<()> {
        let increments = self.increments;
        let worker = Automaton::builder("worker")
            .state(LOOP, "load the counter into the worker's register", |status, machine| {
                if !machine.wait_nothing(status, true)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                let register = format!("register.{}", machine.key());
                status.with_domain_mut::<KvSpace, _>(|space| {
                    let seen = space.get("counter");
                    space.set(&register, seen);
                })?;
                machine.goto(WRITE);
                Ok(HandlerOutcome::Continue)
            })
            .state(WRITE, "store the register incremented", move |status, machine| {
                if !machine.wait_nothing(status, true)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                let register = format!("register.{}", machine.key());
                status.with_domain_mut::<KvSpace, _>(|space| {
                    let seen = space.get(&register);
                    space.set("counter", seen + 1);
                })?;
                let done = machine.with_locals(|locals| locals.increment("done"));
                if done >= increments {
                    return Ok(HandlerOutcome::Exit);
                }
                machine.goto(LOOP);
                Ok(HandlerOutcome::Continue)
            })
            .build()?;
        status.register_automaton(worker)?;
        for _ in 0..self.workers {
            status.start_machine("worker", "worker", LocalVars::new(), MachineContext::default())?;
        }
        Ok(())
    }

    fn check(&self, status: &Status) -> Vec<String> {
        if !status.machine_keys().is_empty() {
            return Vec::new();
        }
        let counter = counter(status, "counter");
        let expected = i64::try_from(self.workers * self.increments).unwrap_or(i64::MAX);
        if counter == expected {
            Vec::new()
        } else {
            vec![format!("lost update: counter is {counter}, expected {expected}")]
        }
    }
}

/// Tokens deposited by scheduled slots and collected by one machine
#[derive(Debug, Clone)]
pub struct TimedDeposits {
    /// Virtual times of the deposits
    pub at: Vec<u64>,
}

impl Scenario for TimedDeposits {
    fn name(&self) -> &str {
        "timed-deposits"
    }

    fn description(&self) -> &str {
        "scheduler slots feed tokens to a waiting collector"
    }

    fn meta(&self) -> Box<dyn MetaContext> {
        Box::new(KvSpace::new())
    }

    fn slot_processor(&self) -> Arc<dyn SlotProcessor> {
        Arc::new(KvSlotProcessor)
    }

    fn setup(&self, status: &Arc<Status>) -> Result<()> {
        let expected = self.at.len() as u64;
        let collector = Automaton::builder("collector")
            .state(LOOP, "wait for a token, then collect it", move |status, machine| {
                if !machine.wait_for_event(status, UserEvent::named("tokens"), false)? {
                    return Ok(HandlerOutcome::Stopped);
                }
                let now = i64::try_from(status.now()).unwrap_or(i64::MAX);
                status.with_domain_mut::<KvSpace, _>(|space| {
                    if space.take("tokens") {
                        space.add("collected", 1);
                        space.set("last_collected_at", now);
                    }
                })?;
                let collected = counter(status, "collected");
                Ok(if u64::try_from(collected).unwrap_or(0) >= expected {
                    HandlerOutcome::Exit
                } else {
                    HandlerOutcome::Continue
                })
            })
            .build()?;
        status.register_automaton(collector)?;
        status.start_machine("collector", "collector", LocalVars::new(), MachineContext::default())?;
        for time in &self.at {
            status.schedule(*time, SlotPayload::new("add", json!({"key": "tokens", "value": 1})));
        }
        Ok(())
    }

    fn check(&self, status: &Status) -> Vec<String> {
        let collected = counter(status, "collected");
        let left = counter(status, "tokens");
        let expected = i64::try_from(self.at.len()).unwrap_or(i64::MAX);
        if status.machine_keys().is_empty() && collected + left != expected {
            vec![format!("collected {collected} and {left} left, expected {expected}")]
        } else {
            Vec::new()
        }
    }
}

/// Every built-in scenario with its default parameters
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(Alternation { rounds: Some(4) }),
        Box::new(Sleepers { count: 3, step: 10 }),
        Box::new(ProducerConsumer { items: 3 }),
        Box::new(RacyCounter {
            workers: 2,
            increments: 1,
        }),
        Box::new(TimedDeposits { at: vec![3, 7, 12] }),
    ]
}

/// Built-in scenario called `name`
pub fn scenario(name: &str) -> Option<Box<dyn Scenario>> {
    catalog().into_iter().find(|scenario| scenario.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique_and_resolvable() {
        let names: Vec<String> = catalog().iter().map(|s| s.name().to_string()).collect();
        for name in &names {
            assert!(scenario(name).is_some());
        }
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
        assert!(scenario("no-such-scenario").is_none());
    }
}
