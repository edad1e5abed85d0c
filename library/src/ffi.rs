//! C entry points (`include/libclock.h`).
//!
//! Handles returned by [`clock_new`] are indices into a process-wide
//! registry, never addresses of library memory. [`clock_destroy`] removes the
//! entry, so any copy of a destroyed handle is rejected with `RET_ERR`.
//! Every entry point is panic-safe: a panic inside the library is reported as
//! `RET_ERR` (or a null handle) instead of unwinding into C.

use crate::{Callback, ClockConfig, ClockContext, ClockError, Result};
use clock_common::{RET_ERR, RET_MISSING_CALLBACK, RET_OK};
use dashmap::DashMap;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

/// `typedef void (*ClockCallBack)(int callerRet, const char* msg, size_t len, void* userData);`
pub type ClockCallBack =
    Option<unsafe extern "C" fn(c_int, *const c_char, usize, *mut c_void)>;

static CONTEXTS: OnceLock<DashMap<usize, Arc<ClockContext>>> = OnceLock::new();
static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(1);

fn registry() -> &'static DashMap<usize, Arc<ClockContext>> {
    CONTEXTS.get_or_init(DashMap::new)
}

fn lookup(handle: *mut c_void) -> Option<Arc<ClockContext>> {
    let context = registry()
        .get(&(handle as usize))
        .map(|entry| entry.value().clone());
    if context.is_none() {
        warn!(handle = handle as usize, "unknown or destroyed clock handle");
    }
    context
}

/// Caller user data, handed back verbatim and never dereferenced.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// The library only passes the pointer back to the caller's own function.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

fn wrap_callback(callback: ClockCallBack, user_data: *mut c_void) -> Option<Callback> {
    let callback = callback?;
    let user_data = UserData(user_data);
    Some(Callback::new(move |status, msg| unsafe {
        callback(
            status.code(),
            msg.as_ptr() as *const c_char,
            msg.len(),
            user_data.as_ptr(),
        )
    }))
}

fn status_code(entry: &str, result: Result<()>) -> c_int {
    match result {
        Ok(()) => RET_OK,
        Err(ClockError::MissingCallback) => RET_MISSING_CALLBACK,
        Err(err) => {
            debug!(entry, "{}", err);
            err.status().code()
        }
    }
}

fn guarded(entry: &str, f: impl FnOnce() -> c_int) -> c_int {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(code) => code,
        Err(_) => {
            error!(entry, "panic inside libclock entry point");
            RET_ERR
        }
    }
}

/// Create a context. `callback` becomes the standing event callback and
/// receives the creation completion. Returns null on failure.
#[no_mangle]
pub extern "C" fn clock_new(callback: ClockCallBack, user_data: *mut c_void) -> *mut c_void {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let config = ClockConfig::from_env_or_default();
        match ClockContext::new(config, wrap_callback(callback, user_data)) {
            Ok(context) => {
                let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
                registry().insert(handle, Arc::new(context));
                handle as *mut c_void
            }
            Err(err) => {
                error!("failed to create clock context: {}", err);
                ptr::null_mut()
            }
        }
    }));
    result.unwrap_or(ptr::null_mut())
}

/// Destroy a context. The handle is invalid afterwards, unless
/// `RET_MISSING_CALLBACK` is returned (nothing was torn down).
#[no_mangle]
pub extern "C" fn clock_destroy(
    ctx: *mut c_void,
    callback: ClockCallBack,
    user_data: *mut c_void,
) -> c_int {
    guarded("clock_destroy", || {
        let Some(context) = lookup(ctx) else {
            return RET_ERR;
        };
        match context.destroy(wrap_callback(callback, user_data)) {
            Err(ClockError::MissingCallback) => RET_MISSING_CALLBACK,
            result => {
                registry().remove(&(ctx as usize));
                status_code("clock_destroy", result)
            }
        }
    })
}

/// Replace the standing event callback. A null `callback` clears it.
#[no_mangle]
pub extern "C" fn clock_set_event_callback(
    ctx: *mut c_void,
    callback: ClockCallBack,
    user_data: *mut c_void,
) {
    guarded("clock_set_event_callback", || {
        let Some(context) = lookup(ctx) else {
            return RET_ERR;
        };
        status_code(
            "clock_set_event_callback",
            context.set_event_callback(wrap_callback(callback, user_data)),
        )
    });
}

/// Schedule `alarm_msg` to fire `time_millis` from now.
///
/// # Safety
/// `alarm_msg` must be null or point to a NUL-terminated string that stays
/// valid for the duration of the call. The bytes are copied.
#[no_mangle]
pub unsafe extern "C" fn clock_set_alarm(
    ctx: *mut c_void,
    time_millis: c_int,
    alarm_msg: *const c_char,
    callback: ClockCallBack,
    user_data: *mut c_void,
) -> c_int {
    guarded("clock_set_alarm", || {
        let Some(context) = lookup(ctx) else {
            return RET_ERR;
        };
        if alarm_msg.is_null() {
            return status_code(
                "clock_set_alarm",
                Err(ClockError::MalformedMessage("null alarm message".to_string())),
            );
        }
        let message = unsafe { CStr::from_ptr(alarm_msg) }.to_bytes();
        let result = context.set_alarm(
            i64::from(time_millis),
            message,
            wrap_callback(callback, user_data),
        );
        status_code("clock_set_alarm", result.map(|_| ()))
    })
}

/// Deliver a framed snapshot of pending alarms to `callback` (or the
/// standing event callback) before returning.
#[no_mangle]
pub extern "C" fn clock_list_alarms(
    ctx: *mut c_void,
    callback: ClockCallBack,
    user_data: *mut c_void,
) -> c_int {
    guarded("clock_list_alarms", || {
        let Some(context) = lookup(ctx) else {
            return RET_ERR;
        };
        status_code(
            "clock_list_alarms",
            context.list_alarms(wrap_callback(callback, user_data)),
        )
    })
}

/// Deliver a JSON metrics snapshot to `callback` (or the standing event
/// callback) before returning.
#[no_mangle]
pub extern "C" fn clock_get_metrics(
    ctx: *mut c_void,
    callback: ClockCallBack,
    user_data: *mut c_void,
) -> c_int {
    guarded("clock_get_metrics", || {
        let Some(context) = lookup(ctx) else {
            return RET_ERR;
        };
        status_code(
            "clock_get_metrics",
            context.report_metrics(wrap_callback(callback, user_data)),
        )
    })
}
