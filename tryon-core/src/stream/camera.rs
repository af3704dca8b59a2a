//! Camera sources.
//!
//! A [`Camera`] is a device description; [`Camera::acquire`] opens it and
//! returns an exclusive [`CameraHandle`]. The device is released when the
//! handle is dropped, so every exit path out of an active session frees it.
//!
//! Two sources ship with the crate:
//!
//! - [`SyntheticCamera`]: an animated test pattern, optionally reporting
//!   no dimensions for the first few samples the way a real device does
//!   while it initialises.
//! - [`ImageSequenceCamera`]: cycles through still images in a directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::TryOnError;
use crate::stream::types::{PixelFormat, RawFrame};

// ── Traits ───────────────────────────────────────────────────────

/// An openable frame source.
pub trait Camera: Send {
    /// Open the device. Fails with [`TryOnError::Acquisition`] when the
    /// device is unavailable or access is denied.
    fn acquire(&mut self) -> Result<Box<dyn CameraHandle>, TryOnError>;
}

/// Exclusive access to an open camera. Dropping the handle releases it.
pub trait CameraHandle: Send {
    /// Sample the current frame.
    ///
    /// Returns `None` while the device has not reported dimensions yet.
    fn sample(&mut self) -> Option<RawFrame>;
}

// ── SyntheticCamera ──────────────────────────────────────────────

/// Generates a moving RGB gradient.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    warmup_frames: u32,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            warmup_frames: 0,
        }
    }

    /// Report no dimensions for the first `frames` samples.
    pub fn with_warmup(mut self, frames: u32) -> Self {
        self.warmup_frames = frames;
        self
    }
}

impl Camera for SyntheticCamera {
    fn acquire(&mut self) -> Result<Box<dyn CameraHandle>, TryOnError> {
        if self.width == 0 || self.height == 0 {
            return Err(TryOnError::Acquisition(format!(
                "synthetic camera has invalid size {}x{}",
                self.width, self.height
            )));
        }
        info!(width = self.width, height = self.height, "synthetic camera opened");
        Ok(Box::new(SyntheticHandle {
            width: self.width,
            height: self.height,
            warmup_left: self.warmup_frames,
            frame_index: 0,
        }))
    }
}

struct SyntheticHandle {
    width: u32,
    height: u32,
    warmup_left: u32,
    frame_index: u32,
}

impl CameraHandle for SyntheticHandle {
    fn sample(&mut self) -> Option<RawFrame> {
        if self.warmup_left > 0 {
            self.warmup_left -= 1;
            return None;
        }

        let shift = self.frame_index.wrapping_mul(4);
        self.frame_index = self.frame_index.wrapping_add(1);

        let width = self.width.max(1);
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x.wrapping_add(shift) % width * 255 / width) as u8);
                data.push((y * 255 / self.height.max(1)) as u8);
                data.push((shift % 256) as u8);
            }
        }
        Some(RawFrame::packed(self.width, self.height, PixelFormat::Rgb8, data))
    }
}

impl Drop for SyntheticHandle {
    fn drop(&mut self) {
        debug!("synthetic camera released");
    }
}

// ── ImageSequenceCamera ──────────────────────────────────────────

/// Replays the images found in a directory, in file-name order.
#[derive(Debug, Clone)]
pub struct ImageSequenceCamera {
    dir: PathBuf,
}

impl ImageSequenceCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load_frames(dir: &Path) -> Result<Vec<RawFrame>, TryOnError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            TryOnError::Acquisition(format!("cannot open {}: {e}", dir.display()))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
                    Some("jpg" | "jpeg" | "png")
                )
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let img = image::open(path)
                .map_err(|e| TryOnError::Acquisition(format!("{}: {e}", path.display())))?
                .to_rgb8();
            let (w, h) = img.dimensions();
            frames.push(RawFrame::packed(w, h, PixelFormat::Rgb8, img.into_raw()));
        }

        if frames.is_empty() {
            return Err(TryOnError::Acquisition(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        Ok(frames)
    }
}

impl Camera for ImageSequenceCamera {
    fn acquire(&mut self) -> Result<Box<dyn CameraHandle>, TryOnError> {
        let frames = Self::load_frames(&self.dir)?;
        info!(dir = %self.dir.display(), frames = frames.len(), "image sequence opened");
        Ok(Box::new(SequenceHandle { frames, next: 0 }))
    }
}

struct SequenceHandle {
    frames: Vec<RawFrame>,
    next: usize,
}

impl CameraHandle for SequenceHandle {
    fn sample(&mut self) -> Option<RawFrame> {
        let mut frame = self.frames.get(self.next)?.clone();
        self.next = (self.next + 1) % self.frames.len();
        frame.timestamp = std::time::Instant::now();
        Some(frame)
    }
}

// ── Tests ────────────────────────────────────────────────────────
