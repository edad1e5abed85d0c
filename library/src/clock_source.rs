use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time provider used by the dispatcher and by `set_alarm` to
/// compute deadlines.
#[async_trait]
pub trait ClockSource: Send + Sync {
    fn now(&self) -> Instant;

    /// Resolve once `deadline` has been reached on this clock.
    async fn sleep_until(&self, deadline: Instant);

    fn deadline_after(&self, delay: Duration) -> Instant {
        self.now() + delay
    }
}

/// Production clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl ClockSource for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_until_reached_deadline_returns_immediately() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep_until(start).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_waits_for_deadline() {
        let clock = TokioClock;
        let deadline = clock.deadline_after(Duration::from_secs(3));
        clock.sleep_until(deadline).await;
        assert!(clock.now() >= deadline);
    }
}
