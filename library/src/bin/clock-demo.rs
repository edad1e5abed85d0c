//! # libclock demo
//!
//! Creates a context, schedules a few alarms, lists them, waits for them to
//! fire and destroys the context. Set `RUST_LOG=clock=debug` for dispatcher
//! detail.

use anyhow::{Context, Result};
use clock::{AlarmRecord, Callback, ClockConfig, ClockContext, Status};
use clock_common::decode_snapshot;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

enum Event {
    Fired(AlarmRecord),
    Other(Status, String),
}

fn main() -> Result<()> {
    // Initialize logging with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("clock=info".parse()?),
        )
        .init();

    let config = ClockConfig::from_env_or_default();
    info!("Starting clock demo with {:?}", config);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let events = Callback::new(move |status, msg| {
        let event = match AlarmRecord::decode(msg) {
            Ok(record) if status.is_ok() => Event::Fired(record),
            _ => Event::Other(status, String::from_utf8_lossy(msg).into_owned()),
        };
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(event);
        }
    });

    let ctx = ClockContext::new(config, Some(events)).context("Failed to create clock context")?;

    let schedule = [(300, "tea is ready"), (100, "stretch"), (200, "check the oven")];
    for (delay_ms, msg) in schedule {
        let id = ctx.set_alarm(delay_ms, msg.as_bytes(), None)?;
        info!("Scheduled {} in {}ms: {}", id, delay_ms, msg);
    }

    ctx.list_alarms(Some(Callback::new(|status, msg| match decode_snapshot(msg) {
        Ok(records) => {
            for record in records {
                info!(
                    "Pending {} in {}ms: {}",
                    record.id,
                    record.remaining_ms,
                    String::from_utf8_lossy(&record.message)
                );
            }
        }
        Err(e) => warn!("Undecodable snapshot ({}): {}", status, e),
    })))?;

    let mut fired = 0;
    while fired < schedule.len() {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Event::Fired(record)) => {
                fired += 1;
                info!(
                    "⏰ {} fired: {}",
                    record.id,
                    String::from_utf8_lossy(&record.message)
                );
            }
            Ok(Event::Other(status, text)) => info!("Event ({}): {}", status, text),
            Err(e) => anyhow::bail!("timed out waiting for alarms: {}", e),
        }
    }

    info!("Metrics: {}", serde_json::to_string(&ctx.metrics())?);

    ctx.destroy(Some(Callback::new(|status, msg| {
        info!("Destroy ({}): {}", status, String::from_utf8_lossy(msg));
    })))
    .context("Failed to destroy clock context")?;

    info!("👋 Clock demo complete");
    Ok(())
}
