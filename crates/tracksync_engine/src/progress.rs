//! Progress reporting.
//!
//! The orchestrator pushes progress, state changes, failures, notices and the
//! final summary into a [`ProgressReporter`]. Every method has a no-op
//! default, so reporters implement only what they care about, and a missing
//! or disconnected listener never affects a run.

use crate::orchestrator::{SyncFailure, SyncPhase, SyncSummary};
use crate::rate_limit::RateLimitNotice;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracksync_protocol::MessageKey;

/// Coarse run state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// A run is in progress.
    Syncing,
    /// The run finished successfully.
    Success,
    /// The run failed.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

/// Phase-specific progress counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProgressDetails {
    /// Counts reported by the check call.
    #[serde(rename_all = "camelCase")]
    Counts {
        /// Local fingerprints.
        client_count: u64,
        /// Server fingerprints.
        server_count: u64,
    },
    /// Diff batches.
    #[serde(rename_all = "camelCase")]
    Diffing {
        /// Local fingerprints compared so far.
        processed: u64,
        /// All local fingerprints.
        total: u64,
        /// Upload candidates found so far.
        to_add: u64,
    },
    /// Pull pages.
    #[serde(rename_all = "camelCase")]
    Pulling {
        /// Pages fetched so far.
        pages: u64,
        /// Pages in the session.
        total_pages: u64,
    },
    /// Add batches.
    #[serde(rename_all = "camelCase")]
    Committing {
        /// Fingerprints sent so far.
        sent: u64,
        /// Fingerprints to send.
        total: u64,
    },
}

/// A non-blocking message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Few session starts remain in the current window.
    RateLimitWarning(RateLimitNotice),
    /// Local and remote sets already match.
    AlreadyLatest,
    /// A run was requested while another one is active.
    SyncInProgress,
}

impl Notice {
    /// The stable key of this notice.
    pub fn message_key(&self) -> MessageKey {
        match self {
            Notice::RateLimitWarning(_) => MessageKey::RateLimitWarning,
            Notice::AlreadyLatest => MessageKey::AlreadyLatest,
            Notice::SyncInProgress => MessageKey::SyncInProgress,
        }
    }
}

/// Receives run events.
pub trait ProgressReporter: Send + Sync {
    /// Progress within a phase, `0..=100` overall.
    fn emit_progress(&self, phase: SyncPhase, percent: u8, details: Option<ProgressDetails>) {
        let _ = (phase, percent, details);
    }

    /// The coarse run state changed.
    fn emit_state(&self, state: RunState) {
        let _ = state;
    }

    /// The run failed.
    fn emit_error(&self, failure: &SyncFailure) {
        let _ = failure;
    }

    /// Advisory message.
    fn emit_notice(&self, notice: &Notice) {
        let _ = notice;
    }

    /// The run succeeded.
    fn emit_summary(&self, summary: &SyncSummary) {
        let _ = summary;
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {}

/// One reported event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// See [`ProgressReporter::emit_progress`].
    Progress {
        /// Current phase.
        phase: SyncPhase,
        /// Overall percentage.
        percent: u8,
        /// Phase counters.
        details: Option<ProgressDetails>,
    },
    /// See [`ProgressReporter::emit_state`].
    State {
        /// New state.
        state: RunState,
    },
    /// See [`ProgressReporter::emit_error`].
    Error {
        /// The failure.
        failure: SyncFailure,
    },
    /// See [`ProgressReporter::emit_notice`].
    Notice {
        /// The notice.
        notice: Notice,
    },
    /// See [`ProgressReporter::emit_summary`].
    Summary {
        /// The summary.
        summary: SyncSummary,
    },
}

/// Forwards events into a channel, typically drained by a UI bridge.
///
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    /// Creates a reporter and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn emit_progress(&self, phase: SyncPhase, percent: u8, details: Option<ProgressDetails>) {
        self.send(ProgressEvent::Progress {
            phase,
            percent,
            details,
        });
    }

    fn emit_state(&self, state: RunState) {
        self.send(ProgressEvent::State { state });
    }

    fn emit_error(&self, failure: &SyncFailure) {
        self.send(ProgressEvent::Error {
            failure: failure.clone(),
        });
    }

    fn emit_notice(&self, notice: &Notice) {
        self.send(ProgressEvent::Notice {
            notice: notice.clone(),
        });
    }

    fn emit_summary(&self, summary: &SyncSummary) {
        self.send(ProgressEvent::Summary {
            summary: summary.clone(),
        });
    }
}

/// Keeps every event in memory for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// State changes, in order.
    pub fn states(&self) -> Vec<RunState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::State { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Progress percentages, in order.
    pub fn percents(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    /// Keys of every emitted failure.
    pub fn error_keys(&self) -> Vec<MessageKey> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Error { failure } => Some(failure.key),
                _ => None,
            })
            .collect()
    }

    /// Every emitted notice.
    pub fn notices(&self) -> Vec<Notice> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Notice { notice } => Some(notice.clone()),
                _ => None,
            })
            .collect()
    }

    /// The last emitted summary.
    pub fn summary(&self) -> Option<SyncSummary> {
        self.events.lock().iter().rev().find_map(|event| match event {
            ProgressEvent::Summary { summary } => Some(summary.clone()),
            _ => None,
        })
    }

    fn push(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

impl ProgressReporter for RecordingReporter {
    fn emit_progress(&self, phase: SyncPhase, percent: u8, details: Option<ProgressDetails>) {
        self.push(ProgressEvent::Progress {
            phase,
            percent,
            details,
        });
    }

    fn emit_state(&self, state: RunState) {
        self.push(ProgressEvent::State { state });
    }

    fn emit_error(&self, failure: &SyncFailure) {
        self.push(ProgressEvent::Error {
            failure: failure.clone(),
        });
    }

    fn emit_notice(&self, notice: &Notice) {
        self.push(ProgressEvent::Notice {
            notice: notice.clone(),
        });
    }

    fn emit_summary(&self, summary: &SyncSummary) {
        self.push(ProgressEvent::Summary {
            summary: summary.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn noop_reporter_accepts_everything() {
        let reporter = NoopReporter;
        reporter.emit_progress(SyncPhase::Checking, 5, None);
        reporter.emit_state(RunState::Syncing);
        reporter.emit_notice(&Notice::AlreadyLatest);
    }

    #[test]
    fn recorder_filters_by_kind() {
        let reporter = RecordingReporter::new();
        reporter.emit_state(RunState::Syncing);
        reporter.emit_progress(
            SyncPhase::Checking,
            5,
            Some(ProgressDetails::Counts {
                client_count: 2,
                server_count: 3,
            }),
        );
        reporter.emit_notice(&Notice::AlreadyLatest);
        reporter.emit_state(RunState::Success);

        assert_eq!(reporter.states(), vec![RunState::Syncing, RunState::Success]);
        assert_eq!(reporter.percents(), vec![5]);
        assert_eq!(reporter.notices(), vec![Notice::AlreadyLatest]);
        assert!(reporter.summary().is_none());
        assert_eq!(reporter.events().len(), 4);
    }

    #[tokio::test]
    async fn channel_reporter_survives_dropped_receiver() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.emit_state(RunState::Syncing);
        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::State {
                state: RunState::Syncing
            })
        );

        drop(rx);
        reporter.emit_state(RunState::Failed);
    }

    #[test]
    fn notice_keys() {
        let warning = Notice::RateLimitWarning(RateLimitNotice {
            used: 9,
            limit: 10,
            retry_after: Duration::from_secs(30),
        });
        assert_eq!(warning.message_key(), MessageKey::RateLimitWarning);
        assert_eq!(Notice::AlreadyLatest.message_key(), MessageKey::AlreadyLatest);
    }

    #[test]
    fn events_serialize_for_ipc() {
        let event = ProgressEvent::Progress {
            phase: SyncPhase::Pulling,
            percent: 60,
            details: Some(ProgressDetails::Pulling {
                pages: 1,
                total_pages: 2,
            }),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "event": "progress",
                "phase": "pulling",
                "percent": 60,
                "details": { "kind": "pulling", "pages": 1, "totalPages": 2 }
            })
        );
    }
}
