//! Bounded per-backend admission slots.
//!
//! Each backend gets a counter capped at the configured capacity. Waiters
//! park on a [`Notify`] and re-check occupancy whenever a slot is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Result, SchedulerError};

/// Default number of concurrent requests per backend.
pub const DEFAULT_CAPACITY: usize = 1;

struct Slot {
    occupied: Mutex<usize>,
    freed: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            occupied: Mutex::new(0),
            freed: Notify::new(),
        }
    }

    fn try_reserve(&self, capacity: usize) -> bool {
        let mut occupied = self.occupied.lock();
        if *occupied < capacity {
            *occupied += 1;
            true
        } else {
            false
        }
    }
}

/// Thread-safe bounded admission counters keyed by backend name.
pub struct SlotQueue {
    capacity: usize,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl SlotQueue {
    /// Create slot queues with `capacity` slots per backend (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Slots per backend.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve a slot on `name`, waiting until one is free.
    ///
    /// `None` waits without bound. `Some(d)` fails with
    /// [`SchedulerError::AdmissionTimeout`] once `d` has elapsed; a zero
    /// duration makes a single attempt.
    pub async fn reserve(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        let slot = self.slot(name);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Register interest before checking so a release in between is not missed.
            let freed = slot.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            if slot.try_reserve(self.capacity) {
                return Ok(());
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, freed).await.is_err() {
                        // One last look: a slot may have been freed right at the deadline.
                        if slot.try_reserve(self.capacity) {
                            return Ok(());
                        }
                        return Err(SchedulerError::AdmissionTimeout(timeout.unwrap_or_default()));
                    }
                }
                None => freed.await,
            }
        }
    }

    /// Reserve a slot on `name` if one is free right now.
    pub fn try_reserve(&self, name: &str) -> bool {
        self.slot(name).try_reserve(self.capacity)
    }

    /// Release a slot on `name`.
    pub fn release(&self, name: &str) -> Result<()> {
        let slot = self
            .slots
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::NotReserved(name.to_string()))?;

        {
            let mut occupied = slot.occupied.lock();
            if *occupied == 0 {
                return Err(SchedulerError::NotReserved(name.to_string()));
            }
            *occupied -= 1;
        }

        slot.freed.notify_waiters();
        Ok(())
    }

    /// Current occupancy of `name`. Unknown names report zero.
    pub fn length(&self, name: &str) -> usize {
        self.slots
            .lock()
            .get(name)
            .map(|s| *s.occupied.lock())
            .unwrap_or(0)
    }

    fn slot(&self, name: &str) -> Arc<Slot> {
        self.slots
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }
}

impl Default for SlotQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
