//! Alarm table
//!
//! Authoritative set of pending alarms for one context. Entries are keyed by
//! `(deadline, id)`; ids grow monotonically, so iteration order is deadline
//! order with insertion order breaking ties.

use crate::gateway::Callback;
use crate::{ClockError, Result};
use bytes::Bytes;
use clock_common::{AlarmId, AlarmRecord};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Alarm {
    pub id: AlarmId,
    pub deadline: Instant,
    pub message: Bytes,
    /// Per-alarm firing target; `None` means the standing slot at firing time.
    pub target: Option<Callback>,
}

impl Alarm {
    pub fn record(&self, now: Instant) -> AlarmRecord {
        let remaining = self.deadline.saturating_duration_since(now);
        AlarmRecord::new(self.id, remaining.as_millis() as u64, self.message.clone())
    }
}

#[derive(Debug)]
pub struct AlarmTable {
    entries: BTreeMap<(Instant, AlarmId), Alarm>,
    next_id: u64,
    capacity: usize,
    closed: bool,
}

impl AlarmTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            capacity,
            closed: false,
        }
    }

    /// Insert an alarm due `delay` after `now`.
    pub fn insert(
        &mut self,
        now: Instant,
        delay: Duration,
        message: Bytes,
        target: Option<Callback>,
    ) -> Result<AlarmId> {
        if self.closed {
            return Err(ClockError::ContextDestroyed);
        }
        if self.entries.len() >= self.capacity {
            return Err(ClockError::CapacityExceeded {
                pending: self.entries.len(),
                max: self.capacity,
            });
        }

        let id = AlarmId(self.next_id);
        self.next_id += 1;
        let deadline = now + delay;

        let previous = self.entries.insert(
            (deadline, id),
            Alarm {
                id,
                deadline,
                message,
                target,
            },
        );
        debug_assert!(previous.is_none(), "alarm id {} reused", id);
        Ok(id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove the earliest alarm if its deadline is at or before `now`.
    pub fn pop_next_due(&mut self, now: Instant) -> Option<Alarm> {
        let entry = self.entries.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        Some(entry.remove())
    }

    /// Remove every alarm whose deadline is at or before `now`, in firing order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Alarm> {
        std::iter::from_fn(|| self.pop_next_due(now)).collect()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<AlarmRecord> {
        self.entries.values().map(|alarm| alarm.record(now)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refuse further inserts and hand back everything still pending.
    pub fn close(&mut self) -> Vec<Alarm> {
        self.closed = true;
        std::mem::take(&mut self.entries).into_values().collect()
    }
}
