//! Shared types for the capture → process → display pipeline.
//!
//! [`RawFrame`] is what a camera hands the scheduler, [`FrameJob`] is one
//! capture attempt travelling through admission and transport, and
//! [`ProcessingResult`] is the correlated reply applied by the reconciler.
//! Wire representations live in [`crate::stream::wire`].

use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TryOnError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw camera frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed frame sampled from a camera.
///
/// The `data` buffer holds `height` rows of `stride` bytes each. `stride`
/// may exceed `width * bytes_per_pixel` when the device pads rows.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes**.
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl RawFrame {
    /// Build a tightly packed frame (`stride == width * bpp`).
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            data,
            timestamp: Instant::now(),
        }
    }

    /// Total byte size the raw bitmap occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Returns a row slice (including possible padding bytes).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        let end = start + self.stride as usize;
        &self.data[start..end]
    }

    /// Whether the device has reported usable dimensions yet.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.stride as usize >= self.width as usize * self.format.bytes_per_pixel()
            && self.data.len() >= self.byte_len()
    }
}

// ── FrameOptions ─────────────────────────────────────────────────

/// Physical frame dimensions used by the remote service to scale an
/// overlay. All values are millimetres.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub frame_width_mm: Option<f32>,
    pub frame_height_mm: Option<f32>,
    pub lens_width_mm: Option<f32>,
    pub lens_height_mm: Option<f32>,
    pub bridge_width_mm: Option<f32>,
    pub temple_length_mm: Option<f32>,
}

impl Calibration {
    /// Populated `(field name, value)` pairs in wire order.
    pub fn fields(&self) -> Vec<(&'static str, f32)> {
        [
            ("frame_width_mm", self.frame_width_mm),
            ("frame_height_mm", self.frame_height_mm),
            ("lens_width_mm", self.lens_width_mm),
            ("lens_height_mm", self.lens_height_mm),
            ("bridge_width_mm", self.bridge_width_mm),
            ("temple_length_mm", self.temple_length_mm),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

/// Selected-target descriptor forwarded untouched to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOptions {
    /// Target kind, e.g. `"glasses"` or `"hat"`.
    pub product_type: String,
    /// Stable target identifier from the catalog.
    pub product_id: String,
    /// Ask the service to draw measurement overlays.
    pub show_measurements: bool,
    /// Optional physical dimensions of the target.
    pub calibration: Option<Calibration>,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            product_type: "glasses".into(),
            product_id: "product_1".into(),
            show_measurements: false,
            calibration: None,
        }
    }
}

// ── JobState ─────────────────────────────────────────────────────

/// Lifecycle of a [`FrameJob`].
///
/// ```text
///  Captured ──► Dispatched ──► Completed
///     │              └───────► Failed
///     └──► Dropped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Captured,
    Dispatched,
    Completed,
    Failed,
    Dropped,
}

impl JobState {
    /// `Completed`, `Failed` and `Dropped` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Dropped)
    }
}

// ── FrameJob ─────────────────────────────────────────────────────

/// One capture attempt.
///
/// Created by the scheduler on each productive tick and owned by the
/// pipeline run that created it; it is moved into the transport on
/// dispatch and never reused.
#[derive(Debug)]
pub struct FrameJob {
    /// Monotonic capture sequence.
    pub sequence: u64,
    /// Encoded image (JPEG).
    pub payload: Bytes,
    /// Target descriptor passed through to the service.
    pub options: FrameOptions,
    /// When the source frame was sampled.
    pub captured_at: Instant,
    state: JobState,
}

impl FrameJob {
    pub fn new(sequence: u64, payload: Bytes, options: FrameOptions) -> Self {
        Self {
            sequence,
            payload,
            options,
            captured_at: Instant::now(),
            state: JobState::Captured,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move the encoded payload out, leaving the job empty.
    pub fn take_payload(&mut self) -> Bytes {
        std::mem::take(&mut self.payload)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Captured`.
    pub fn mark_dispatched(&mut self) -> Result<(), TryOnError> {
        match self.state {
            JobState::Captured => {
                self.state = JobState::Dispatched;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot dispatch: job not in Captured state",
            )),
        }
    }

    /// Valid from: `Captured`. Releases the payload.
    pub fn mark_dropped(&mut self) -> Result<(), TryOnError> {
        match self.state {
            JobState::Captured => {
                self.state = JobState::Dropped;
                self.payload = Bytes::new();
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot drop: job already left Captured state",
            )),
        }
    }

    /// Valid from: `Dispatched`.
    pub fn mark_completed(&mut self) -> Result<(), TryOnError> {
        match self.state {
            JobState::Dispatched => {
                self.state = JobState::Completed;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot complete: job not in Dispatched state",
            )),
        }
    }

    /// Valid from: `Captured` (encode/dispatch error) or `Dispatched`.
    pub fn mark_failed(&mut self) -> Result<(), TryOnError> {
        match self.state {
            JobState::Captured | JobState::Dispatched => {
                self.state = JobState::Failed;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot fail: job already terminal",
            )),
        }
    }
}

// ── ProcessingResult ─────────────────────────────────────────────

/// Structured measurement data returned alongside an overlay.
///
/// The coordinator does not interpret these values; they are kept as
/// JSON so a presentation layer can render whatever the service sends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub facial: Option<serde_json::Value>,
    pub product: Option<serde_json::Value>,
    pub placement: Option<serde_json::Value>,
}

impl Measurements {
    pub fn is_empty(&self) -> bool {
        self.facial.is_none() && self.product.is_none() && self.placement.is_none()
    }
}

/// A reply correlated to a [`FrameJob`] by `sequence`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub sequence: u64,
    /// Encoded annotated output, if the service produced one.
    pub image: Option<Bytes>,
    /// Accuracy/speed label reported by the service.
    pub quality_tier: String,
    /// Soft condition, e.g. `no_face`. Not an error.
    pub diagnostic: Option<String>,
    pub measurements: Option<Measurements>,
}

impl ProcessingResult {
    /// A soft-miss result: no image, only an advisory code.
    pub fn advisory(sequence: u64, diagnostic: impl Into<String>) -> Self {
        Self {
            sequence,
            image: None,
            quality_tier: String::new(),
            diagnostic: Some(diagnostic.into()),
            measurements: None,
        }
    }

    /// A result carrying an overlay image.
    pub fn with_image(sequence: u64, image: Bytes, quality_tier: impl Into<String>) -> Self {
        Self {
            sequence,
            image: Some(image),
            quality_tier: quality_tier.into(),
            diagnostic: None,
            measurements: None,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> FrameJob {
        FrameJob::new(1, Bytes::from_static(b"jpeg"), FrameOptions::default())
    }

    #[test]
    fn job_happy_path() {
        let mut j = job();
        assert_eq!(j.state(), JobState::Captured);
        j.mark_dispatched().unwrap();
        j.mark_completed().unwrap();
        assert_eq!(j.state(), JobState::Completed);
        assert!(j.state().is_terminal());
    }

    #[test]
    fn dropped_job_releases_payload() {
        let mut j = job();
        j.mark_dropped().unwrap();
        assert_eq!(j.state(), JobState::Dropped);
        assert!(j.payload.is_empty());
    }

    #[test]
    fn dispatched_job_cannot_be_dropped() {
        let mut j = job();
        j.mark_dispatched().unwrap();
        assert!(j.mark_dropped().is_err());
        assert_eq!(j.state(), JobState::Dispatched);
    }

    #[test]
    fn terminal_job_cannot_fail() {
        let mut j = job();
        j.mark_dispatched().unwrap();
        j.mark_completed().unwrap();
        assert!(j.mark_failed().is_err());
    }

    #[test]
    fn calibration_fields_skip_missing() {
        let cal = Calibration {
            frame_width_mm: Some(135.0),
            bridge_width_mm: Some(18.0),
            ..Calibration::default()
        };
        let fields = cal.fields();
        assert_eq!(fields, vec![("frame_width_mm", 135.0), ("bridge_width_mm", 18.0)]);
    }

    #[test]
    fn frame_without_dimensions() {
        let frame = RawFrame::packed(0, 0, PixelFormat::Rgb8, Vec::new());
        assert!(!frame.has_dimensions());
        let frame = RawFrame::packed(2, 2, PixelFormat::Rgb8, vec![0; 12]);
        assert!(frame.has_dimensions());
        assert_eq!(frame.row(1).len(), 6);
    }
}
