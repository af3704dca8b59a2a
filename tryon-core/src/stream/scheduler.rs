//! Capture scheduler: tick cadence and sequence assignment.
//!
//! The scheduler owns no task of its own. The session polls the
//! [`Interval`] it builds inside its event loop and calls
//! [`CaptureScheduler::capture`] on every tick, so capture timing stays
//! decoupled from transport completion.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tracing::trace;

use crate::error::TryOnError;
use crate::stream::camera::CameraHandle;
use crate::stream::encoder::FrameEncoder;
use crate::stream::types::{FrameJob, FrameOptions};

/// Minimum tick spacing accepted by the scheduler.
pub const MIN_CADENCE: Duration = Duration::from_millis(10);

/// Outcome of one capture tick.
#[derive(Debug)]
pub enum Capture {
    /// The camera has no dimensions yet. Not counted anywhere.
    NotReady,
    /// A new job ready for admission.
    Job(FrameJob),
    /// A frame was sampled but could not be encoded.
    Failed { sequence: u64, error: TryOnError },
}

pub struct CaptureScheduler {
    cadence: Duration,
    next_sequence: u64,
}

impl CaptureScheduler {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence: cadence.max(MIN_CADENCE),
            next_sequence: 1,
        }
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Sequence the next productive tick will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Tick source for the session loop. Missed ticks are skipped rather
    /// than bursted, so a stalled loop never floods the pipeline.
    pub fn interval(&self) -> Interval {
        let mut interval = tokio::time::interval(self.cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    /// Sample the camera and produce the next job.
    pub fn capture(
        &mut self,
        camera: &mut dyn CameraHandle,
        encoder: &mut FrameEncoder,
        options: &FrameOptions,
    ) -> Capture {
        let Some(frame) = camera.sample().filter(|f| f.has_dimensions()) else {
            trace!("camera not ready; skipping tick");
            return Capture::NotReady;
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        match encoder.encode(&frame) {
            Ok(encoded) => {
                let mut job = FrameJob::new(sequence, encoded.data, options.clone());
                job.captured_at = frame.timestamp;
                Capture::Job(job)
            }
            Err(error) => Capture::Failed { sequence, error },
        }
    }
}
