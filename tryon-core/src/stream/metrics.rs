//! Session metrics: frame counters, effective FPS and latency.
//!
//! `effective_fps` is recomputed on a fixed wall-clock interval as the
//! number of completions observed since the previous recompute, scaled by
//! the configured interval. Back-to-back completions therefore never
//! produce a spike the way an instantaneous per-frame rate would, and
//! timer jitter on the recompute tick does not skew the figure.

use std::time::{Duration, Instant};

// ── MetricsSnapshot ──────────────────────────────────────────────

/// Counters exposed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub frames_completed: u64,
    pub frames_dropped: u64,
    pub frames_failed: u64,
    /// Jobs currently dispatched and awaiting a result.
    pub in_flight: usize,
    /// Completions per second over the last recompute window.
    pub effective_fps: f64,
    /// Smoothed dispatch → result round-trip time.
    pub latency: Duration,
}

// ── MetricsRecorder ──────────────────────────────────────────────

pub struct MetricsRecorder {
    frames_captured: u64,
    frames_completed: u64,
    frames_dropped: u64,
    frames_failed: u64,
    /// Completions since `window_start`.
    window_completions: u64,
    window_start: Instant,
    /// Configured recompute interval.
    interval: Duration,
    effective_fps: f64,
    /// Smoothed RTT in microseconds.
    smoothed_rtt_us: u64,
}

impl MetricsRecorder {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    /// Create a recorder whose first window opens at `start`.
    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            frames_captured: 0,
            frames_completed: 0,
            frames_dropped: 0,
            frames_failed: 0,
            window_completions: 0,
            window_start: start,
            interval,
            effective_fps: 0.0,
            smoothed_rtt_us: 0,
        }
    }

    /// Zero every counter; called when a session becomes active.
    pub fn reset(&mut self, start: Instant) {
        *self = Self::starting_at(start, self.interval);
    }

    pub fn on_captured(&mut self) {
        self.frames_captured += 1;
    }

    pub fn on_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    pub fn on_failed(&mut self) {
        self.frames_failed += 1;
    }

    /// Record a completion. Only completions at or after the current
    /// window start count toward the next FPS figure.
    pub fn on_completed(&mut self, at: Instant) {
        self.frames_completed += 1;
        if at >= self.window_start {
            self.window_completions += 1;
        }
    }

    /// Update the smoothed RTT (exponential moving average, α = 0.125).
    pub fn record_latency(&mut self, rtt: Duration) {
        let rtt_us = rtt.as_micros() as u64;
        if self.smoothed_rtt_us == 0 {
            self.smoothed_rtt_us = rtt_us;
        } else {
            // EWMA: srtt = 7/8 * srtt + 1/8 * sample
            self.smoothed_rtt_us = self.smoothed_rtt_us * 7 / 8 + rtt_us / 8;
        }
    }

    /// Close the current window at `now` and recompute `effective_fps`.
    pub fn recompute(&mut self, now: Instant) -> f64 {
        if self.interval.is_zero() {
            return self.effective_fps;
        }
        self.effective_fps = self.window_completions as f64 / self.interval.as_secs_f64();
        self.window_completions = 0;
        self.window_start = now;
        self.effective_fps
    }

    pub fn effective_fps(&self) -> f64 {
        self.effective_fps
    }

    /// Smoothed round-trip time, or `Duration::ZERO` if not yet measured.
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.smoothed_rtt_us)
    }

    pub fn snapshot(&self, in_flight: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_captured: self.frames_captured,
            frames_completed: self.frames_completed,
            frames_dropped: self.frames_dropped,
            frames_failed: self.frames_failed,
            in_flight,
            effective_fps: self.effective_fps,
            latency: self.latency(),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────
