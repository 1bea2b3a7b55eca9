//! Virtual and event clocks shared by the controller and machine threads

use std::sync::atomic::{AtomicU64, Ordering};

/// Discrete clocks of a run.
///
/// The virtual clock is simulated time advanced by the controller. The event
/// clock is finer grained: every wait call advances it, so waits issued within
/// the same virtual tick still have a total order.
#[derive(Debug, Default)]
pub struct Clocks {
    virtual_time: AtomicU64,
    event_time: AtomicU64,
}

impl Clocks {
    /// Clocks starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time
    pub fn now(&self) -> u64 {
        self.virtual_time.load(Ordering::SeqCst)
    }

    /// Current event time
    pub fn event_now(&self) -> u64 {
        self.event_time.load(Ordering::SeqCst)
    }

    /// Advance virtual time by `delta`, returning the new value
    pub fn advance(&self, delta: u64) -> u64 {
        self.virtual_time.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Move virtual time forward to `target`; never moves it backwards
    pub fn advance_to(&self, target: u64) -> u64 {
        self.virtual_time.fetch_max(target, Ordering::SeqCst).max(target)
    }

    /// Advance the event clock by one, returning the new value
    pub fn tick_event(&self) -> u64 {
        self.event_time.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Set both clocks, used when restoring a recorded branch
    pub fn restore(&self, virtual_time: u64, event_time: u64) {
        self.virtual_time.store(virtual_time, Ordering::SeqCst);
        self.event_time.store(event_time, Ordering::SeqCst);
    }

    /// Back to zero
    pub fn reset(&self) {
        self.restore(0, 0);
    }
}
