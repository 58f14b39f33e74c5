//! Run lifecycle tracking.
//!
//! One run at a time: `idle → awaiting → streaming → terminal → idle`.
//! The tracker owns the run's timing (start timestamp, thinking window)
//! and the silence watchdog — a cooperative task that flips a shared
//! "silent but still running" flag when no event has arrived within the
//! threshold. Crossing the threshold never changes the formal state.
//!
//! `chat.send` does not choose the run id; the tracker enters `awaiting`
//! without one and adopts the id of the first streamed event. Events for
//! any other run id are stale and ignored, which also absorbs duplicate
//! terminal events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tether_core::{ClientError, RunId};

/// Formal run state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// No run in progress.
    Idle,
    /// Request sent, no stream yet.
    Awaiting,
    /// Delta events are arriving.
    Streaming,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunEnd {
    /// Completed normally.
    Final,
    /// Cancelled by the user (or the server).
    Aborted,
    /// Failed with a server-reported error.
    Error,
}

/// Timing summary produced by a terminal transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunCompletion {
    /// The run id, if any streamed event ever adopted one.
    pub run_id: Option<RunId>,
    /// Wall-clock duration, ms. Absent for aborted runs.
    pub run_duration_ms: Option<u64>,
    /// Total reasoning window, ms.
    pub thinking_duration_ms: Option<u64>,
}

/// Per-run state machine with silence detection.
#[derive(Debug)]
pub struct RunTracker {
    phase: RunPhase,
    run_id: Option<RunId>,
    started_at_ms: Option<i64>,
    first_thinking_ms: Option<i64>,
    last_thinking_ms: Option<i64>,
    silent: Arc<AtomicBool>,
    last_event: Arc<Mutex<Instant>>,
    watchdog_cancel: Option<CancellationToken>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    /// Create an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            run_id: None,
            started_at_ms: None,
            first_thinking_ms: None,
            last_thinking_ms: None,
            silent: Arc::new(AtomicBool::new(false)),
            last_event: Arc::new(Mutex::new(Instant::now())),
            watchdog_cancel: None,
        }
    }

    /// Current formal state.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// The adopted run id, once a streamed event arrived.
    #[must_use]
    pub fn active_run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    /// Whether the run is streaming but has produced no event within the
    /// watchdog threshold.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.silent.load(Ordering::Relaxed)
    }

    /// Enter `awaiting` for a newly submitted message.
    ///
    /// Only legal from `idle`.
    pub fn begin_awaiting(&mut self, now_ms: i64) -> Result<(), ClientError> {
        if self.phase != RunPhase::Idle {
            return Err(ClientError::invalid_state("a run is already active"));
        }
        self.phase = RunPhase::Awaiting;
        self.run_id = None;
        self.started_at_ms = Some(now_ms);
        self.first_thinking_ms = None;
        self.last_thinking_ms = None;
        self.feed();
        Ok(())
    }

    /// Force `streaming` with a known start time (resume after reconnect,
    /// where the in-flight run was detected from history rather than from a
    /// local submit).
    pub fn force_streaming(&mut self, now_ms: i64) {
        if self.phase == RunPhase::Idle {
            self.started_at_ms = Some(now_ms);
        }
        self.phase = RunPhase::Streaming;
        self.feed();
    }

    /// Whether an event for `run_id` belongs to the active run.
    #[must_use]
    pub fn accepts(&self, run_id: &RunId) -> bool {
        match self.phase {
            RunPhase::Idle => false,
            // No id adopted yet: the first streamed event names the run.
            RunPhase::Awaiting => true,
            RunPhase::Streaming => self.run_id.as_ref().is_none_or(|id| id == run_id),
        }
    }

    /// Record a meaningful streamed event for `run_id`.
    ///
    /// Returns `false` for stale events (unknown run, or no run at all).
    pub fn note_event(&mut self, run_id: &RunId) -> bool {
        if !self.accepts(run_id) {
            debug!(run_id = %run_id, "ignoring event for inactive run");
            return false;
        }
        if self.run_id.is_none() {
            self.run_id = Some(run_id.clone());
        }
        self.phase = RunPhase::Streaming;
        self.feed();
        true
    }

    /// Record a reasoning delta for thinking-duration accounting.
    pub fn note_thinking(&mut self, now_ms: i64) {
        if self.first_thinking_ms.is_none() {
            self.first_thinking_ms = Some(now_ms);
        }
        self.last_thinking_ms = Some(now_ms);
    }

    /// Apply a terminal transition.
    ///
    /// `run_id` is the id named by the terminal event, when it names one.
    /// Returns `None` — and changes nothing — when no run is active or the
    /// id does not match the adopted run (duplicate/stale terminal event).
    pub fn finish(&mut self, run_id: Option<&RunId>, end: RunEnd, now_ms: i64) -> Option<RunCompletion> {
        if self.phase == RunPhase::Idle {
            return None;
        }
        if let (Some(named), Some(active)) = (run_id, self.run_id.as_ref()) {
            if named != active {
                return None;
            }
        }

        let run_duration_ms = match end {
            RunEnd::Aborted => None,
            RunEnd::Final | RunEnd::Error => self
                .started_at_ms
                .map(|started| u64::try_from((now_ms - started).max(0)).unwrap_or(0)),
        };
        let thinking_duration_ms = match (self.first_thinking_ms, self.last_thinking_ms) {
            (Some(first), Some(last)) if last >= first => {
                u64::try_from(last - first).ok()
            }
            _ => None,
        };

        let completion = RunCompletion {
            run_id: self.run_id.take(),
            run_duration_ms,
            thinking_duration_ms,
        };

        self.phase = RunPhase::Idle;
        self.started_at_ms = None;
        self.first_thinking_ms = None;
        self.last_thinking_ms = None;
        self.cancel_watchdog();
        self.silent.store(false, Ordering::Relaxed);
        Some(completion)
    }

    /// Reset the silence clock and clear the silent flag.
    fn feed(&self) {
        *self.last_event.lock() = Instant::now();
        self.silent.store(false, Ordering::Relaxed);
    }

    /// Start the silence watchdog task.
    ///
    /// Replaces any previous watchdog. The task only ever *sets* the silent
    /// flag; event arrival clears it via [`note_event`](Self::note_event).
    /// Requires a tokio runtime; without one the watchdog stays disarmed.
    pub fn spawn_watchdog(&mut self, threshold: Duration) {
        self.cancel_watchdog();
        self.feed();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cancel = CancellationToken::new();
        self.watchdog_cancel = Some(cancel.clone());
        drop(handle.spawn(run_silence_watchdog(
            threshold,
            Arc::clone(&self.last_event),
            Arc::clone(&self.silent),
            cancel,
        )));
    }

    /// Stop the watchdog, if running.
    pub fn cancel_watchdog(&mut self) {
        if let Some(cancel) = self.watchdog_cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for RunTracker {
    fn drop(&mut self) {
        self.cancel_watchdog();
    }
}

/// Watchdog loop: flips `silent` to `true` once `last_event` is older than
/// `threshold`. Runs until cancelled.
async fn run_silence_watchdog(
    threshold: Duration,
    last_event: Arc<Mutex<Instant>>,
    silent: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let tick = threshold.checked_div(4).unwrap_or(threshold).max(Duration::from_millis(50));
    let mut check_interval = time::interval(tick);
    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if last_event.lock().elapsed() >= threshold {
                    silent.store(true, Ordering::Relaxed);
                }
            }
            () = cancel.cancelled() => {
                return;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
