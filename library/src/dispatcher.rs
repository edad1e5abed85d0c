//! Dispatcher worker
//!
//! One worker thread per context drives a single-threaded tokio runtime. It
//! parks on the nearest deadline (or indefinitely when the table is empty),
//! wakes on deadline expiry or on a table-mutation notification, and hands
//! every due alarm to the gateway outside the table lock.

use crate::alarm_table::AlarmTable;
use crate::clock_source::ClockSource;
use crate::gateway::{CallbackSlot, Completion, Gateway, Operation};
use crate::metrics::ClockMetrics;
use crate::Result;
use bytes::Bytes;
use clock_common::AlarmRecord;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::Notify;
use tracing::{debug, info, trace};
use uuid::Uuid;

pub(crate) const CREATED_MESSAGE: &[u8] = b"clock context created";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Table empty, waiting for a mutation.
    Idle,
    /// Parked on the nearest deadline.
    Waiting,
    /// Delivering due alarms.
    Firing,
    /// Terminal.
    Stopped,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Waiting => "waiting",
            DispatcherState::Firing => "firing",
            DispatcherState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// State shared between a context handle and its dispatcher.
pub(crate) struct Shared {
    pub(crate) context_id: Uuid,
    pub(crate) table: Mutex<AlarmTable>,
    pub(crate) slot: CallbackSlot,
    pub(crate) wake: Notify,
    pub(crate) clock: Arc<dyn ClockSource>,
    pub(crate) gateway: Gateway,
    pub(crate) metrics: Arc<ClockMetrics>,
    pub(crate) state: RwLock<DispatcherState>,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.table.lock().is_closed()
    }
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    creation: Option<Completion>,
}

impl Dispatcher {
    /// Start the worker. The creation completion is delivered from the worker
    /// before it first waits, so it always precedes any other delivery.
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        creation: Completion,
        thread_name: &str,
    ) -> Result<JoinHandle<()>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let dispatcher = Dispatcher {
            shared,
            creation: Some(creation),
        };
        let handle = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || runtime.block_on(dispatcher.run_loop()))?;
        Ok(handle)
    }

    async fn run_loop(mut self) {
        if let Some(creation) = self.creation.take() {
            self.shared
                .gateway
                .deliver(creation, Ok(Bytes::from_static(CREATED_MESSAGE)));
        }

        loop {
            let next = {
                let table = self.shared.table.lock();
                if table.is_closed() {
                    break;
                }
                table.next_deadline()
            };

            match next {
                None => {
                    self.set_state(DispatcherState::Idle);
                    self.shared.wake.notified().await;
                }
                Some(deadline) => {
                    self.set_state(DispatcherState::Waiting);
                    tokio::select! {
                        _ = self.shared.clock.sleep_until(deadline) => {}
                        _ = self.shared.wake.notified() => {}
                    }
                }
            }

            self.fire_due();
        }

        self.set_state(DispatcherState::Stopped);
        info!(context_id = %self.shared.context_id, "dispatcher stopped");
    }

    /// Deliver due alarms one at a time. Each alarm stays in the table until
    /// the moment it is handed to the gateway, so snapshots taken while a
    /// callback runs still list the rest of the batch.
    fn fire_due(&self) {
        let mut fired = 0usize;
        loop {
            let alarm = {
                let mut table = self.shared.table.lock();
                if table.is_closed() {
                    if fired > 0 {
                        debug!(
                            context_id = %self.shared.context_id,
                            fired,
                            "context destroyed while firing; stopping"
                        );
                    }
                    return;
                }
                table.pop_next_due(self.shared.clock.now())
            };
            let Some(alarm) = alarm else {
                break;
            };

            if fired == 0 {
                self.set_state(DispatcherState::Firing);
            }
            fired += 1;

            // Slot snapshot taken per delivery: replacements apply to alarms
            // not yet handed over.
            let target = alarm.target.or_else(|| self.shared.slot.snapshot());
            let payload = AlarmRecord::new(alarm.id, 0, alarm.message).encode();
            self.shared.metrics.record_fired();
            self.shared.gateway.deliver(
                Completion::new(Operation::AlarmFired(alarm.id), target),
                Ok(payload),
            );
        }

        if fired == 0 {
            trace!(context_id = %self.shared.context_id, "woke with nothing due");
        }
    }

    fn set_state(&self, state: DispatcherState) {
        let mut current = self.shared.state.write();
        let from = *current;
        if from != state {
            trace!(context_id = %self.shared.context_id, %from, to = %state, "dispatcher state");
            *current = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Callback;
    use crate::{ClockConfig, ClockContext};
    use async_trait::async_trait;
    use clock_common::Status;
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Clock running `offset` ahead of real time.
    struct SkewedClock {
        offset: Duration,
    }

    #[async_trait]
    impl ClockSource for SkewedClock {
        fn now(&self) -> Instant {
            Instant::now() + self.offset
        }

        async fn sleep_until(&self, deadline: Instant) {
            let real = deadline.checked_sub(self.offset).unwrap_or_else(Instant::now);
            tokio::time::sleep_until(real).await;
        }
    }

    fn channel_callback() -> (Callback, mpsc::Receiver<(Status, Vec<u8>)>) {
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let cb = Callback::new(move |status, msg| {
            let _ = tx.lock().unwrap().send((status, msg.to_vec()));
        });
        (cb, rx)
    }

    #[test]
    fn test_creation_completion_is_first_delivery() {
        let (cb, rx) = channel_callback();
        let ctx = ClockContext::new(ClockConfig::default(), Some(cb)).unwrap();
        ctx.set_alarm(0, b"now", None).unwrap();

        let (status, msg) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(msg, CREATED_MESSAGE.to_vec());

        let (_, fired) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let record = AlarmRecord::decode(&fired).unwrap();
        assert_eq!(record.message.as_ref(), b"now");
        assert_eq!(record.remaining_ms, 0);
    }

    #[test]
    fn test_deadlines_follow_the_clock_source() {
        // A one hour alarm on a clock that is two hours ahead is computed from
        // that clock's `now`, so it waits the full hour and stays pending.
        let clock = Arc::new(SkewedClock {
            offset: Duration::from_secs(7200),
        });
        let ctx = ClockContext::with_clock(ClockConfig::default(), None, clock).unwrap();
        let (cb, rx) = channel_callback();
        ctx.set_alarm(3_600_000, b"in an hour", Some(cb)).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        let pending = ctx.pending_alarms().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].remaining_ms > 3_500_000);
    }

    #[test]
    fn test_dispatcher_idles_then_stops() {
        let ctx = ClockContext::new(ClockConfig::default(), None).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ctx.dispatcher_state() != DispatcherState::Idle {
            assert!(std::time::Instant::now() < deadline, "dispatcher never went idle");
            std::thread::sleep(Duration::from_millis(5));
        }

        let (cb, rx) = channel_callback();
        ctx.destroy(Some(cb)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap().0, Status::Ok);
        assert_eq!(ctx.dispatcher_state(), DispatcherState::Stopped);
    }

    #[test]
    fn test_sooner_alarm_preempts_current_wait() {
        let (cb, rx) = channel_callback();
        let ctx = ClockContext::new(ClockConfig::default(), None).unwrap();
        ctx.set_alarm(60_000, b"late", Some(cb.clone())).unwrap();
        // Let the dispatcher park on the 60s deadline first.
        std::thread::sleep(Duration::from_millis(50));
        ctx.set_alarm(10, b"early", Some(cb)).unwrap();

        let (_, fired) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(AlarmRecord::decode(&fired).unwrap().message.as_ref(), b"early");
    }
}
