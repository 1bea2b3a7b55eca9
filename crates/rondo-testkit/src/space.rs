//! Key/value domain state
//!
//! [`KvSpace`] is a bag of named integer counters. A user event named `k`
//! matches when counter `k` is positive, or, if the event payload is an
//! integer, when the counter equals it.

use rondo_core::{
    EngineError, MetaContext, Result, SlotContext, SlotPayload, SlotProcessor, UserEvent,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;

/// Named integer counters shared by the machines of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvSpace {
    values: BTreeMap<String, i64>,
}

impl KvSpace {
    /// Empty space
    pub fn new() -> Self {
        Self::default()
    }

    /// Space with `key` preset to `value`
    pub fn with(mut self, key: &str, value: i64) -> Self {
        self.set(key, value);
        self
    }

    /// Counter `key`, zero when absent
    pub fn get(&self, key: &str) -> i64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    /// Set counter `key`
    pub fn set(&mut self, key: &str, value: i64) {
        self.values.insert(key.to_string(), value);
    }

    /// Add `delta` to counter `key`, returning the new value
    pub fn add(&mut self, key: &str, delta: i64) -> i64 {
        let value = self.values.entry(key.to_string()).or_insert(0);
        *value += delta;
        *value
    }

    /// Decrement counter `key` if it is positive
    pub fn take(&mut self, key: &str) -> bool {
        match self.values.get_mut(key) {
            Some(value) if *value > 0 => {
                *value -= 1;
                true
            }
            _ => false,
        }
    }

    /// Counters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

impl MetaContext for KvSpace {
    fn event_fulfilled(&self, event: &UserEvent, _clock: u64) -> bool {
        match event.payload.as_i64() {
            Some(expected) => self.get(&event.name) == expected,
            None => self.get(&event.name) > 0,
        }
    }

    fn copy(&self) -> Box<dyn MetaContext> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }
}

/// Slot processor applying `add` and `set` payloads to a [`KvSpace`].
///
/// Payload data is `{"key": "...", "value": n}`. An `add` slot with an
/// `every` field reschedules itself that many ticks later.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvSlotProcessor;

impl SlotProcessor for KvSlotProcessor {
    fn process(&self, payload: &SlotPayload, ctx: &mut SlotContext<'_>) -> Result<()> {
        let key = payload
            .data
            .get("key")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EngineError::domain(format!("slot '{}' has no key", payload.tag)))?;
        let value = payload
            .data
            .get("value")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(1);
        let space = ctx
            .meta
            .as_any_mut()
            .downcast_mut::<KvSpace>()
            .ok_or_else(|| EngineError::domain("slot processor needs a KvSpace"))?;

        match payload.tag.as_str() {
            "add" => {
                space.add(key, value);
            }
            "set" => space.set(key, value),
            other => return Err(EngineError::domain(format!("unknown slot tag '{other}'"))),
        }
        if let Some(every) = payload.data.get("every").and_then(serde_json::Value::as_u64) {
            ctx.scheduler.insert(ctx.now + every.max(1), payload.clone());
        }
        tracing::debug!(tag = %payload.tag, key, value, now = ctx.now, "applied slot");
        Ok(())
    }
}
