//! Time source for pacing, windows and summaries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A source of time the rate limiter and orchestrator can share.
///
/// `now_ms` is milliseconds since the Unix epoch. It only needs to be
/// monotonic within a process; the wall-clock reading is used for summaries.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> u64;

    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Current time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        let ms = i64::try_from(self.now_ms()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }
}

/// The real clock.
///
/// Anchors the wall clock once and advances it with a monotonic instant so
/// that system clock adjustments cannot make the pacer go backwards.
#[derive(Debug)]
pub struct SystemClock {
    anchor_ms: u64,
    anchor: tokio::time::Instant,
}

impl SystemClock {
    /// Creates a clock anchored at the current time.
    pub fn new() -> Self {
        let anchor_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        Self {
            anchor_ms,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to.
///
/// `sleep` returns immediately after advancing the clock by the requested
/// duration, and every sleep is recorded.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Sum of all sleeps.
    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Default for ManualClock {
    /// 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(1_704_067_200_000)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new(1_000);
        clock.sleep(Duration::from_millis(650)).await;
        clock.advance(Duration::from_millis(50));

        assert_eq!(clock.now_ms(), 1_700);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(650)]);
        assert_eq!(clock.total_slept(), Duration::from_millis(650));
    }

    #[test]
    fn manual_clock_utc() {
        let clock = ManualClock::default();
        assert_eq!(clock.now_utc().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn system_clock_moves_forward() {
        let clock = SystemClock::new();
        let before = clock.now_ms();
        clock.sleep(Duration::from_millis(20)).await;
        assert!(clock.now_ms() >= before + 20);
        assert!((clock.now_utc() - Utc::now()).num_seconds().abs() < 5);
    }
}
