//! Request pacing and session-start admission.
//!
//! Two independent throttles share one [`Clock`]:
//!
//! - [`Pacer`] spaces every outbound request at least `min_interval` apart,
//!   no matter how many callers share it.
//! - [`SessionWindow`] caps how many sync runs may start inside a sliding
//!   window, with an advisory notice as the cap approaches.
//!
//! [`RateLimiter`] bundles both and also owns the single-flight flag, so
//! every orchestrator sharing a limiter sees at most one active run.

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Spaces outbound requests.
///
/// Each call reserves the slot `max(now, next)` and moves `next` one interval
/// past it, so concurrent callers queue up instead of bursting.
pub struct Pacer {
    min_interval_ms: u64,
    next_ms: Mutex<u64>,
    clock: Arc<dyn Clock>,
}

impl Pacer {
    /// Creates a pacer with the given spacing.
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval_ms: duration_ms(min_interval),
            next_ms: Mutex::new(0),
            clock,
        }
    }

    /// Waits for this caller's slot. Returns how long it waited.
    pub async fn acquire(&self) -> Duration {
        let wait_ms = {
            let mut next = self.next_ms.lock();
            let now = self.clock.now_ms();
            let slot = now.max(*next);
            *next = slot.saturating_add(self.min_interval_ms);
            slot - now
        };

        let wait = Duration::from_millis(wait_ms);
        if !wait.is_zero() {
            debug!(wait_ms, "pacing request");
            self.clock.sleep(wait).await;
        }
        wait
    }
}

/// Advisory notice emitted when few session starts remain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitNotice {
    /// Starts in the window before this one.
    pub used: usize,
    /// Window cap.
    pub limit: usize,
    /// Time until the oldest start leaves the window.
    #[serde(rename = "retryAfterMs", with = "crate::config::millis")]
    pub retry_after: Duration,
}

/// Outcome of asking the session window for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The start was admitted and recorded.
    Admitted {
        /// Set when the window is one or two starts from full.
        notice: Option<RateLimitNotice>,
    },
    /// The window is full.
    Rejected {
        /// Time until the oldest start leaves the window.
        retry_after: Duration,
    },
}

impl Admission {
    /// True for [`Admission::Admitted`].
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Sliding window of session-start timestamps.
///
/// Expired entries are trimmed lazily on every check.
#[derive(Debug)]
pub struct SessionWindow {
    window_ms: u64,
    max_starts: usize,
    starts: Mutex<VecDeque<u64>>,
}

impl SessionWindow {
    /// Creates an empty window.
    pub fn new(window: Duration, max_starts: usize) -> Self {
        Self {
            window_ms: duration_ms(window),
            max_starts,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// True when a start at `now_ms` would be admitted.
    pub fn can_start(&self, now_ms: u64) -> bool {
        let mut starts = self.starts.lock();
        self.trim(&mut starts, now_ms);
        starts.len() < self.max_starts
    }

    /// Records a start at `now_ms`.
    pub fn record_start(&self, now_ms: u64) {
        self.starts.lock().push_back(now_ms);
    }

    /// Checks and records a start in one step.
    pub fn admit(&self, now_ms: u64) -> Admission {
        let mut starts = self.starts.lock();
        self.trim(&mut starts, now_ms);

        let used = starts.len();
        if used >= self.max_starts {
            return Admission::Rejected {
                retry_after: self.retry_after(&starts, now_ms),
            };
        }

        let near_cap = [2, 1]
            .iter()
            .any(|left| self.max_starts.checked_sub(*left) == Some(used));
        let notice = (near_cap && used > 0).then(|| RateLimitNotice {
            used,
            limit: self.max_starts,
            retry_after: self.retry_after(&starts, now_ms),
        });

        starts.push_back(now_ms);
        Admission::Admitted { notice }
    }

    /// Starts currently inside the window.
    pub fn in_window(&self, now_ms: u64) -> usize {
        let mut starts = self.starts.lock();
        self.trim(&mut starts, now_ms);
        starts.len()
    }

    fn trim(&self, starts: &mut VecDeque<u64>, now_ms: u64) {
        while let Some(&oldest) = starts.front() {
            if now_ms.saturating_sub(oldest) >= self.window_ms {
                starts.pop_front();
            } else {
                break;
            }
        }
    }

    fn retry_after(&self, starts: &VecDeque<u64>, now_ms: u64) -> Duration {
        let oldest = starts.front().copied().unwrap_or(now_ms);
        let elapsed = now_ms.saturating_sub(oldest);
        Duration::from_millis(self.window_ms.saturating_sub(elapsed))
    }
}

/// The process-wide rate limiter.
///
/// Construct one and share it through an `Arc` with everything that talks to
/// the sync backend.
pub struct RateLimiter {
    pacer: Pacer,
    sessions: SessionWindow,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
}

impl RateLimiter {
    /// Creates a limiter from configuration.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pacer: Pacer::new(config.min_interval, Arc::clone(&clock)),
            sessions: SessionWindow::new(config.session_window, config.max_sessions_per_window),
            clock,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Claims the single active-run slot.
    ///
    /// Returns `None` while another run holds it. The slot is released when
    /// the returned guard drops.
    pub fn try_begin_session(&self) -> Option<SessionGuard<'_>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("session slot already taken");
            return None;
        }
        Some(SessionGuard {
            flag: &self.in_flight,
        })
    }

    /// True while some run holds the active-run slot.
    pub fn is_session_active(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits for the next request slot.
    pub async fn pace(&self) -> Duration {
        self.pacer.acquire().await
    }

    /// Asks for admission of a new sync run now.
    pub fn admit_session(&self) -> Admission {
        self.sessions.admit(self.clock.now_ms())
    }

    /// True when a sync run could start now.
    pub fn can_start(&self) -> bool {
        self.sessions.can_start(self.clock.now_ms())
    }

    /// The shared clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Holds the active-run slot of a [`RateLimiter`] until dropped.
#[must_use = "the slot is released as soon as the guard drops"]
pub struct SessionGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
