//! Scheduler activity counters
//!
//! Counters are updated lock-free from the caller threads and the dispatcher;
//! [`ClockMetrics::snapshot`] produces a serializable view for reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct ClockMetrics {
    alarms_scheduled: AtomicU64,
    alarms_fired: AtomicU64,
    alarms_discarded: AtomicU64,
    alarms_rejected: AtomicU64,
    snapshots_served: AtomicU64,

    // Gateway diagnostics
    deliveries: AtomicU64,
    callback_faults: AtomicU64,
    missing_callback_deliveries: AtomicU64,

    start_time: DateTime<Utc>,
    last_activity: parking_lot::RwLock<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub alarms_scheduled: u64,
    pub alarms_fired: u64,
    pub alarms_discarded: u64,
    pub alarms_rejected: u64,
    pub alarms_pending: u64,
    pub snapshots_served: u64,
    pub deliveries: u64,
    pub callback_faults: u64,
    pub missing_callback_deliveries: u64,
    pub last_activity: DateTime<Utc>,
}

impl Default for ClockMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockMetrics {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            alarms_scheduled: AtomicU64::new(0),
            alarms_fired: AtomicU64::new(0),
            alarms_discarded: AtomicU64::new(0),
            alarms_rejected: AtomicU64::new(0),
            snapshots_served: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            callback_faults: AtomicU64::new(0),
            missing_callback_deliveries: AtomicU64::new(0),
            start_time: now,
            last_activity: parking_lot::RwLock::new(now),
        }
    }

    pub fn record_scheduled(&self) {
        self.alarms_scheduled.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_fired(&self) {
        self.alarms_fired.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_discarded(&self, count: usize) {
        self.alarms_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.alarms_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots_served.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_fault(&self) {
        self.callback_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_callback(&self) {
        self.missing_callback_deliveries
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn alarms_fired(&self) -> u64 {
        self.alarms_fired.load(Ordering::Relaxed)
    }

    pub fn callback_faults(&self) -> u64 {
        self.callback_faults.load(Ordering::Relaxed)
    }

    pub fn missing_callback_deliveries(&self) -> u64 {
        self.missing_callback_deliveries.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        *self.last_activity.write() = Utc::now();
    }

    pub fn snapshot(&self, alarms_pending: usize) -> MetricsSnapshot {
        let now = Utc::now();
        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: (now - self.start_time).num_seconds(),
            alarms_scheduled: self.alarms_scheduled.load(Ordering::Relaxed),
            alarms_fired: self.alarms_fired.load(Ordering::Relaxed),
            alarms_discarded: self.alarms_discarded.load(Ordering::Relaxed),
            alarms_rejected: self.alarms_rejected.load(Ordering::Relaxed),
            alarms_pending: alarms_pending as u64,
            snapshots_served: self.snapshots_served.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            callback_faults: self.callback_faults.load(Ordering::Relaxed),
            missing_callback_deliveries: self
                .missing_callback_deliveries
                .load(Ordering::Relaxed),
            last_activity: *self.last_activity.read(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counters_accumulate_into_snapshot() {
        let metrics = ClockMetrics::new();
        metrics.record_scheduled();
        metrics.record_scheduled();
        metrics.record_fired();
        metrics.record_discarded(3);
        metrics.record_rejected();
        metrics.record_callback_fault();

        let snap = metrics.snapshot(1);
        assert_eq!(snap.alarms_scheduled, 2);
        assert_eq!(snap.alarms_fired, 1);
        assert_eq!(snap.alarms_discarded, 3);
        assert_eq!(snap.alarms_rejected, 1);
        assert_eq!(snap.alarms_pending, 1);
        assert_eq!(snap.callback_faults, 1);
        assert_eq!(snap.missing_callback_deliveries, 0);
        assert!(snap.uptime_seconds >= 0);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let metrics = ClockMetrics::new();
        metrics.record_snapshot();
        let json = serde_json::to_value(metrics.snapshot(0)).unwrap();
        assert_eq!(json["snapshots_served"], 1);
        assert_eq!(json["alarms_pending"], 0);
    }
}
