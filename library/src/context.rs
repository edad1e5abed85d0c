use crate::alarm_table::AlarmTable;
use crate::clock_source::{ClockSource, TokioClock};
use crate::dispatcher::{Dispatcher, DispatcherState, Shared};
use crate::gateway::{Callback, CallbackSlot, Completion, Gateway, Operation};
use crate::metrics::{ClockMetrics, MetricsSnapshot};
use crate::{ClockConfig, ClockError, Result};
use bytes::Bytes;
use clock_common::{encode_snapshot, AlarmId, AlarmRecord};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const DESTROYED_MESSAGE: &[u8] = b"clock context destroyed";

/// Scheduling context: one alarm table, one standing event callback and one
/// dispatcher worker.
///
/// All methods take `&self` and may be called from any thread, including from
/// inside a callback running on the dispatcher. After [`destroy`] every
/// operation fails with [`ClockError::ContextDestroyed`].
///
/// [`destroy`]: ClockContext::destroy
pub struct ClockContext {
    shared: Arc<Shared>,
    config: ClockConfig,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ClockContext {
    /// Create a context and start its dispatcher. `callback` becomes the
    /// standing event callback and receives the creation completion.
    pub fn new(config: ClockConfig, callback: Option<Callback>) -> Result<Self> {
        Self::with_clock(config, callback, Arc::new(TokioClock))
    }

    pub fn with_clock(
        config: ClockConfig,
        callback: Option<Callback>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self> {
        config.validate().map_err(ClockError::Configuration)?;

        let context_id = Uuid::new_v4();
        let metrics = Arc::new(ClockMetrics::new());
        let shared = Arc::new(Shared {
            context_id,
            table: Mutex::new(AlarmTable::new(config.max_pending_alarms)),
            slot: CallbackSlot::new(callback.clone()),
            wake: Notify::new(),
            clock,
            gateway: Gateway::new(context_id, metrics.clone()),
            metrics,
            state: RwLock::new(DispatcherState::Idle),
        });

        let creation = Completion::new(Operation::Create, callback);
        let handle = Dispatcher::spawn(shared.clone(), creation, &config.dispatcher_thread_name)?;

        info!(%context_id, "clock context created");
        Ok(Self {
            shared,
            config,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.context_id
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        *self.shared.state.read()
    }

    /// Replace the standing event callback. Deliveries already handed to the
    /// gateway keep the callback they were bound to.
    pub fn set_event_callback(&self, callback: Option<Callback>) -> Result<()> {
        self.ensure_alive()?;
        let installed = callback.is_some();
        self.shared.slot.replace(callback);
        debug!(context_id = %self.shared.context_id, installed, "event callback replaced");
        Ok(())
    }

    /// Schedule `message` to be delivered `delay_ms` from now.
    ///
    /// `callback` receives the firing notification for this alarm; when
    /// `None`, the standing event callback current at firing time is used.
    /// Returns as soon as the alarm is in the table.
    #[instrument(skip_all, fields(context_id = %self.shared.context_id, delay_ms = delay_ms))]
    pub fn set_alarm(
        &self,
        delay_ms: i64,
        message: &[u8],
        callback: Option<Callback>,
    ) -> Result<AlarmId> {
        self.ensure_alive()?;

        let result = self.validate_alarm(delay_ms, message, callback.is_some());
        let delay = match result {
            Ok(delay) => delay,
            Err(err) => {
                self.shared.metrics.record_rejected();
                warn!("alarm rejected: {}", err);
                return Err(err);
            }
        };

        let message = Bytes::copy_from_slice(message);
        let inserted = {
            let mut table = self.shared.table.lock();
            let now = self.shared.clock.now();
            let current_next = table.next_deadline();
            table.insert(now, delay, message, callback).map(|id| {
                let deadline = now + delay;
                (id, current_next.map_or(true, |next| deadline < next))
            })
        };

        let (id, sooner) = match inserted {
            Ok(inserted) => inserted,
            Err(err) => {
                self.shared.metrics.record_rejected();
                warn!("alarm rejected: {}", err);
                return Err(err);
            }
        };

        if sooner {
            self.shared.wake.notify_one();
        }
        self.shared.metrics.record_scheduled();
        debug!(%id, "alarm scheduled");
        Ok(id)
    }

    /// Deliver a snapshot of every pending alarm as one framed payload
    /// (see [`clock_common::encode_snapshot`]). Delivery happens on the
    /// calling thread before this returns.
    #[instrument(skip_all, fields(context_id = %self.shared.context_id))]
    pub fn list_alarms(&self, callback: Option<Callback>) -> Result<()> {
        self.ensure_alive()?;
        let target = self.resolve_target(callback)?;

        let records = self.pending_alarms()?;
        debug!(pending = records.len(), "listing alarms");
        self.shared.metrics.record_snapshot();
        self.shared.gateway.deliver(
            Completion::new(Operation::ListAlarms, Some(target)),
            Ok(encode_snapshot(&records)),
        );
        Ok(())
    }

    /// Pending alarms in firing order.
    pub fn pending_alarms(&self) -> Result<Vec<AlarmRecord>> {
        let table = self.shared.table.lock();
        if table.is_closed() {
            return Err(ClockError::ContextDestroyed);
        }
        Ok(table.snapshot(self.shared.clock.now()))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let pending = self.shared.table.lock().len();
        self.shared.metrics.snapshot(pending)
    }

    /// Deliver [`ClockContext::metrics`] as JSON through the gateway.
    pub fn report_metrics(&self, callback: Option<Callback>) -> Result<()> {
        self.ensure_alive()?;
        let target = self.resolve_target(callback)?;
        let payload = serde_json::to_vec(&self.metrics()).map(Bytes::from);
        self.shared.gateway.deliver(
            Completion::new(Operation::Metrics, Some(target)),
            payload.map_err(ClockError::from),
        );
        Ok(())
    }

    /// Stop the dispatcher, discard pending alarms without firing them and
    /// deliver one destroy completion to `callback` (or the standing event
    /// callback).
    ///
    /// Blocks until the dispatcher has exited, unless called from a callback
    /// running on the dispatcher itself; then the worker exits as soon as that
    /// callback returns.
    #[instrument(skip_all, fields(context_id = %self.shared.context_id))]
    pub fn destroy(&self, callback: Option<Callback>) -> Result<()> {
        self.ensure_alive()?;
        let target = self.resolve_target(callback)?;

        let discarded = self.close()?;
        let teardown = self.join_dispatcher();
        match &teardown {
            Ok(()) => info!(discarded, "clock context destroyed"),
            Err(fault) => warn!(discarded, "clock context destroyed with fault: {}", fault),
        }

        let payload = match &teardown {
            Ok(()) => Ok(Bytes::from_static(DESTROYED_MESSAGE)),
            Err(fault) => Err(ClockError::TeardownFault(fault.clone())),
        };
        self.shared
            .gateway
            .deliver(Completion::new(Operation::Destroy, Some(target)), payload);
        teardown.map_err(ClockError::TeardownFault)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(ClockError::ContextDestroyed);
        }
        Ok(())
    }

    fn resolve_target(&self, callback: Option<Callback>) -> Result<Callback> {
        callback
            .or_else(|| self.shared.slot.snapshot())
            .ok_or(ClockError::MissingCallback)
    }

    fn validate_alarm(
        &self,
        delay_ms: i64,
        message: &[u8],
        has_callback: bool,
    ) -> Result<Duration> {
        if delay_ms < 0 || delay_ms as u64 > self.config.max_delay_ms {
            return Err(ClockError::InvalidDelay {
                delay_ms,
                max_ms: self.config.max_delay_ms,
            });
        }
        if message.len() > self.config.max_message_bytes {
            return Err(ClockError::MessageTooLarge {
                len: message.len(),
                max: self.config.max_message_bytes,
            });
        }
        if !has_callback && !self.shared.slot.is_set() {
            return Err(ClockError::MissingCallback);
        }
        Ok(Duration::from_millis(delay_ms as u64))
    }

    /// Close the table and wake the dispatcher so it observes the close.
    /// Returns how many pending alarms were discarded.
    fn close(&self) -> Result<usize> {
        let drained = {
            let mut table = self.shared.table.lock();
            if table.is_closed() {
                return Err(ClockError::ContextDestroyed);
            }
            table.close()
        };
        let discarded = drained.len();
        // Dropped outside the lock: alarms may own caller closures.
        drop(drained);

        self.shared.metrics.record_discarded(discarded);
        self.shared.wake.notify_one();
        Ok(discarded)
    }

    /// Wait for the dispatcher to exit. The error is the fault description.
    fn join_dispatcher(&self) -> std::result::Result<(), String> {
        let Some(handle) = self.dispatcher.lock().take() else {
            return Ok(());
        };
        if handle.thread().id() == std::thread::current().id() {
            debug!("destroy called on the dispatcher; worker exits after this delivery");
            return Ok(());
        }
        handle
            .join()
            .map_err(|_| "dispatcher worker panicked".to_string())
    }
}

impl Drop for ClockContext {
    fn drop(&mut self) {
        if self.close().is_ok() {
            debug!(context_id = %self.shared.context_id, "context dropped without destroy");
            let _ = self.join_dispatcher();
        }
    }
}

impl std::fmt::Debug for ClockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockContext")
            .field("id", &self.shared.context_id)
            .field("state", &self.dispatcher_state())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
