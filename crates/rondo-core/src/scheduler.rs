//! Time-ordered slot scheduler
//!
//! Slots are pending work items keyed by virtual time. One sentinel slot marks
//! the end of the simulation; draining it stops the run. Only the controller
//! thread touches the scheduler of a live run.

use crate::errors::Result;
use crate::meta::MetaContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application payload of a work slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPayload {
    /// Routing tag for the slot processor
    pub tag: String,
    /// Arbitrary payload data
    pub data: serde_json::Value,
}

impl SlotPayload {
    /// Build a payload
    pub fn new(tag: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }
}

/// Kind of a scheduled slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Sentinel marking overall simulation end
    EndOfSimulation,
    /// Application work
    Work(SlotPayload),
}

/// A time-stamped pending work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Virtual time at which the slot becomes ripe
    pub time: u64,
    /// Insertion sequence; orders slots of the same time
    pub seq: u64,
    /// Slot kind
    pub kind: SlotKind,
}

/// Result of taking the next ripe slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RipeSlot {
    /// Application work to process
    Work(Slot),
    /// The end-of-simulation sentinel fired
    End {
        /// Time of the sentinel
        time: u64,
    },
}

/// Ordered collection of pending slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduler {
    slots: BTreeMap<(u64, u64), Slot>,
    next_seq: u64,
}

impl Scheduler {
    /// Create a scheduler whose sentinel fires at `end_time`
    pub fn new(end_time: u64) -> Self {
        let mut scheduler = Self {
            slots: BTreeMap::new(),
            next_seq: 0,
        };
        scheduler.push(end_time, SlotKind::EndOfSimulation);
        scheduler
    }

    /// Schedule work at virtual time `time`, returning its sequence number
    pub fn insert(&mut self, time: u64, payload: SlotPayload) -> u64 {
        self.push(time, SlotKind::Work(payload))
    }

    fn push(&mut self, time: u64, kind: SlotKind) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert((time, seq), Slot { time, seq, kind });
        seq
    }

    /// Remove and return the earliest slot with `time <= now`
    pub fn take_ripe(&mut self, now: u64) -> Option<RipeSlot> {
        let (&key, slot) = self.slots.iter().next()?;
        if slot.time > now {
            return None;
        }
        let slot = self.slots.remove(&key)?;
        Some(match slot.kind {
            SlotKind::EndOfSimulation => RipeSlot::End { time: slot.time },
            SlotKind::Work(_) => RipeSlot::Work(slot),
        })
    }

    /// Time of the earliest pending slot
    pub fn next_time(&self) -> Option<u64> {
        self.slots.keys().next().map(|(time, _)| *time)
    }

    /// Number of pending work slots, excluding the sentinel
    pub fn pending_work(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot.kind, SlotKind::Work(_)))
            .count()
    }

    /// Number of pending slots including the sentinel
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is pending at all
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pending slots in firing order
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }
}

/// Mutable view handed to the slot processor
pub struct SlotContext<'a> {
    /// Current virtual time
    pub now: u64,
    /// Scheduler, for inserting follow-up slots
    pub scheduler: &'a mut Scheduler,
    /// Shared domain state
    pub meta: &'a mut dyn MetaContext,
}

/// Application callback processing ripe work slots
pub trait SlotProcessor: Send + Sync {
    /// Execute one ripe slot
    fn process(&self, payload: &SlotPayload, ctx: &mut SlotContext<'_>) -> Result<()>;
}

/// Slot processor that only logs what it drains
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSlotProcessor;

impl SlotProcessor for NoopSlotProcessor {
    fn process(&self, payload: &SlotPayload, ctx: &mut SlotContext<'_>) -> Result<()> {
        tracing::trace!(tag = %payload.tag, now = ctx.now, "ignoring slot");
        Ok(())
    }
}
