//! Callback gateway
//!
//! Every completion a context produces (creation, destroy, alarm fired,
//! alarm listing, metrics) is a [`Completion`] value. It cannot be cloned and
//! [`Gateway::deliver`] consumes it, so one logical operation maps to at most
//! one callback invocation. The gateway also contains panics raised by caller
//! code and reports deliveries that have no target.

use crate::metrics::ClockMetrics;
use crate::{ClockError, Result};
use bytes::Bytes;
use clock_common::{AlarmId, Status};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

type CallbackFn = dyn Fn(Status, &[u8]) + Send + Sync;

/// Caller-supplied completion handler. Whatever state the caller needs back
/// (the "user data") is captured by the closure itself.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Status, &[u8]) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn invoke(&self, status: Status, message: &[u8]) {
        (self.0)(status, message)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("ptr", &Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Standing event callback of a context. Readers clone the current value
/// once per delivery, so a replacement only affects later deliveries.
#[derive(Debug, Default)]
pub struct CallbackSlot {
    current: RwLock<Option<Callback>>,
}

impl CallbackSlot {
    pub fn new(initial: Option<Callback>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Install `callback`, returning the previous one.
    pub fn replace(&self, callback: Option<Callback>) -> Option<Callback> {
        std::mem::replace(&mut *self.current.write(), callback)
    }

    pub fn snapshot(&self) -> Option<Callback> {
        self.current.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.current.read().is_some()
    }
}

/// Logical operation a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Destroy,
    AlarmFired(AlarmId),
    ListAlarms,
    Metrics,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Destroy => f.write_str("destroy"),
            Operation::AlarmFired(id) => write!(f, "fire {}", id),
            Operation::ListAlarms => f.write_str("list_alarms"),
            Operation::Metrics => f.write_str("metrics"),
        }
    }
}

/// What happened when a completion went through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The callback ran to completion with this status.
    Delivered(Status),
    /// The callback panicked; the panic was contained.
    Faulted,
    /// No callback was available; nothing was invoked.
    MissingCallback,
}

/// Pending result of one logical operation, bound to the callback that must
/// receive it.
#[must_use = "a completion must be handed to the gateway"]
pub struct Completion {
    operation: Operation,
    target: Option<Callback>,
}

impl Completion {
    pub fn new(operation: Operation, target: Option<Callback>) -> Self {
        Self { operation, target }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("operation", &self.operation)
            .field("has_target", &self.target.is_some())
            .finish()
    }
}

pub struct Gateway {
    context_id: Uuid,
    metrics: Arc<ClockMetrics>,
}

impl Gateway {
    pub fn new(context_id: Uuid, metrics: Arc<ClockMetrics>) -> Self {
        Self {
            context_id,
            metrics,
        }
    }

    /// Convert `result` into `(status, message)` and invoke the completion's
    /// target exactly once. Must be called without holding context locks.
    pub fn deliver(&self, completion: Completion, result: Result<Bytes>) -> DeliveryOutcome {
        let Completion { operation, target } = completion;

        let Some(callback) = target else {
            self.metrics.record_missing_callback();
            warn!(
                context_id = %self.context_id,
                %operation,
                "no callback registered; dropping completion"
            );
            return DeliveryOutcome::MissingCallback;
        };

        let (status, message) = match result {
            Ok(payload) => (Status::Ok, payload),
            Err(err) => (err.status(), Bytes::from(err.to_string())),
        };

        self.metrics.record_delivery();
        match catch_unwind(AssertUnwindSafe(|| callback.invoke(status, &message))) {
            Ok(()) => {
                debug!(context_id = %self.context_id, %operation, %status, "completion delivered");
                DeliveryOutcome::Delivered(status)
            }
            Err(panic) => {
                self.metrics.record_callback_fault();
                let fault = ClockError::CallbackPanicked {
                    operation: operation.to_string(),
                    message: panic_message(panic.as_ref()),
                };
                error!(context_id = %self.context_id, %operation, "{}", fault);
                DeliveryOutcome::Faulted
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn gateway() -> (Gateway, Arc<ClockMetrics>) {
        let metrics = Arc::new(ClockMetrics::new());
        (Gateway::new(Uuid::new_v4(), metrics.clone()), metrics)
    }

    fn recording() -> (Callback, Arc<Mutex<Vec<(Status, Vec<u8>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = Callback::new(move |status, msg| sink.lock().unwrap().push((status, msg.to_vec())));
        (cb, seen)
    }

    #[test]
    fn test_ok_result_delivers_payload() {
        let (gateway, metrics) = gateway();
        let (cb, seen) = recording();

        let outcome = gateway.deliver(
            Completion::new(Operation::ListAlarms, Some(cb)),
            Ok(Bytes::from_static(b"payload")),
        );

        assert_eq!(outcome, DeliveryOutcome::Delivered(Status::Ok));
        assert_eq!(*seen.lock().unwrap(), vec![(Status::Ok, b"payload".to_vec())]);
        assert_eq!(metrics.snapshot(0).deliveries, 1);
    }

    #[test]
    fn test_error_result_carries_status_and_text() {
        let (gateway, _) = gateway();
        let (cb, seen) = recording();

        let outcome = gateway.deliver(
            Completion::new(Operation::Destroy, Some(cb)),
            Err(ClockError::TeardownFault("worker panicked".into())),
        );

        assert_eq!(outcome, DeliveryOutcome::Delivered(Status::Err));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, Status::Err);
        assert_eq!(seen[0].1, b"Teardown fault: worker panicked".to_vec());
    }

    #[test]
    fn test_missing_target_reports_to_diagnostics() {
        let (gateway, metrics) = gateway();

        let outcome = gateway.deliver(
            Completion::new(Operation::AlarmFired(AlarmId(4)), None),
            Ok(Bytes::new()),
        );

        assert_eq!(outcome, DeliveryOutcome::MissingCallback);
        assert_eq!(metrics.missing_callback_deliveries(), 1);
        assert_eq!(metrics.snapshot(0).deliveries, 0);
    }

    #[test]
    fn test_panicking_callback_is_contained_and_not_retried() {
        let (gateway, metrics) = gateway();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let cb = Callback::new(move |_, _| {
            *counter.lock().unwrap() += 1;
            panic!("caller bug");
        });

        let outcome = gateway.deliver(
            Completion::new(Operation::AlarmFired(AlarmId(1)), Some(cb)),
            Ok(Bytes::new()),
        );

        assert_eq!(outcome, DeliveryOutcome::Faulted);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(metrics.callback_faults(), 1);
    }

    #[test]
    fn test_slot_replacement_returns_previous() {
        let (first, _) = recording();
        let (second, _) = recording();
        let slot = CallbackSlot::new(Some(first));

        assert!(slot.replace(Some(second)).is_some());
        assert!(slot.is_set());
        assert!(slot.replace(None).is_some());
        assert!(!slot.is_set());
        assert!(slot.snapshot().is_none());
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let (first, seen) = recording();
        let (second, _) = recording();
        let slot = CallbackSlot::new(Some(first));

        let taken = slot.snapshot();
        slot.replace(Some(second));

        let (gateway, _) = gateway();
        let _ = gateway.deliver(Completion::new(Operation::Metrics, taken), Ok(Bytes::new()));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
