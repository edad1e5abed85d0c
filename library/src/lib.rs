//! libclock - embeddable alarm scheduler
//!
//! A [`ClockContext`] owns an alarm table, one standing event callback and a
//! dispatcher worker. Alarms are registered with [`ClockContext::set_alarm`]
//! and delivered exactly once, in deadline order, through the callback
//! gateway. The `ffi` module exposes the same operations as the C interface
//! described in `include/libclock.h`.

pub mod alarm_table;
pub mod clock_source;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod ffi;
pub mod gateway;
pub mod metrics;

pub use alarm_table::{Alarm, AlarmTable};
pub use clock_source::{ClockSource, TokioClock};
pub use config::ClockConfig;
pub use context::ClockContext;
pub use dispatcher::DispatcherState;
pub use error::ClockError;
pub use gateway::{Callback, CallbackSlot, Completion, DeliveryOutcome, Operation};
pub use metrics::{ClockMetrics, MetricsSnapshot};

pub use clock_common::{AlarmId, AlarmRecord, Status};

// Re-export Result type for convenience
pub type Result<T> = std::result::Result<T, ClockError>;
