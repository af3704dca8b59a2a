//! Result reconciliation into the display buffer.
//!
//! Results may arrive out of order (persistent channel) or after their
//! session ended. The [`ResultReconciler`] applies only results newer than
//! the last applied one and publishes the resulting [`DisplayState`] on a
//! `tokio::sync::watch` channel so a renderer can read the latest frame
//! without blocking the coordinator.

use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;

use crate::stream::types::{Measurements, ProcessingResult};

// ── DisplayState ─────────────────────────────────────────────────

/// What the presentation layer should currently show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    /// Last good overlay image (JPEG). Survives soft misses.
    pub image: Option<Bytes>,
    /// Sequence of the last applied result.
    pub last_applied: Option<u64>,
    /// Quality label of the last applied result.
    pub quality_tier: Option<String>,
    /// Current advisory note, e.g. `no_face`.
    pub advisory: Option<String>,
    /// Last per-frame failure, kept for status lines.
    pub last_failure: Option<String>,
    pub measurements: Option<Measurements>,
}

// ── ApplyOutcome ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The result replaced the displayed image.
    Applied,
    /// The result carried no image; only the advisory changed.
    AdvisoryOnly,
    /// Older than (or equal to) the last applied sequence.
    Stale,
    /// The owning session has stopped.
    Closed,
}

// ── ResultReconciler ─────────────────────────────────────────────

pub struct ResultReconciler {
    state: DisplayState,
    closed: bool,
    display_tx: watch::Sender<DisplayState>,
    display_rx: watch::Receiver<DisplayState>,
}

impl ResultReconciler {
    pub fn new() -> Self {
        let (display_tx, display_rx) = watch::channel(DisplayState::default());
        Self {
            state: DisplayState::default(),
            closed: false,
            display_tx,
            display_rx,
        }
    }

    /// Obtain a receiver that yields the display state whenever it
    /// changes.
    pub fn display_receiver(&self) -> watch::Receiver<DisplayState> {
        self.display_rx.clone()
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.state.last_applied
    }

    /// Apply a result unless it is stale or the session has stopped.
    pub fn apply(&mut self, result: ProcessingResult) -> ApplyOutcome {
        if self.closed {
            debug!(sequence = result.sequence, "session stopped; discarding result");
            return ApplyOutcome::Closed;
        }
        if let Some(last) = self.state.last_applied {
            if result.sequence <= last {
                debug!(
                    sequence = result.sequence,
                    last_applied = last,
                    "discarding stale result"
                );
                return ApplyOutcome::Stale;
            }
        }

        self.state.last_applied = Some(result.sequence);
        self.state.last_failure = None;
        if !result.quality_tier.is_empty() {
            self.state.quality_tier = Some(result.quality_tier);
        }
        if result.measurements.is_some() {
            self.state.measurements = result.measurements;
        }

        let outcome = match result.image {
            Some(image) => {
                self.state.image = Some(image);
                self.state.advisory = result.diagnostic;
                ApplyOutcome::Applied
            }
            None => {
                // Keep the last good frame.
                self.state.advisory = result.diagnostic;
                ApplyOutcome::AdvisoryOnly
            }
        };

        self.publish();
        outcome
    }

    /// Note a per-frame failure without touching the displayed image.
    pub fn record_failure(&mut self, sequence: u64, reason: &str) {
        if self.closed {
            return;
        }
        self.state.last_failure = Some(format!("frame {sequence}: {reason}"));
        self.publish();
    }

    /// Refuse all further results; they belong to a stopped session.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn publish(&self) {
        self.display_tx.send_replace(self.state.clone());
    }
}

impl Default for ResultReconciler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
