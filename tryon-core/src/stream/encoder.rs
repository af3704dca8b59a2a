//! JPEG frame encoder.
//!
//! Converts a [`RawFrame`] into a compact JPEG payload suitable for
//! upload:
//!
//! 1. Repack the rows into tightly packed RGB (dropping stride padding
//!    and alpha, swapping BGR order when needed).
//! 2. Downscale so the longest side fits `max_dimension` (aspect ratio
//!    preserved, never upscaled).
//! 3. Compress with the configured JPEG quality.

use bytes::Bytes;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};

use crate::error::TryOnError;
use crate::stream::types::{PixelFormat, RawFrame};

// ── EncoderConfig ────────────────────────────────────────────────

/// Output resolution and quality for [`FrameEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Longest output side in pixels.
    pub max_dimension: u32,
    /// JPEG quality 1..=100.
    pub quality: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_dimension: 320,
            quality: 60,
        }
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// A compressed frame ready for transmission.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// JPEG bytes.
    pub data: Bytes,
    /// Output width after scaling.
    pub width: u32,
    /// Output height after scaling.
    pub height: u32,
}

// ── FrameEncoder ─────────────────────────────────────────────────

pub struct FrameEncoder {
    config: EncoderConfig,
    frame_count: u64,
}

impl FrameEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config: EncoderConfig {
                max_dimension: config.max_dimension.max(1),
                quality: config.quality.clamp(1, 100),
            },
            frame_count: 0,
        }
    }

    /// Encode a raw frame to JPEG.
    pub fn encode(&mut self, frame: &RawFrame) -> Result<EncodedFrame, TryOnError> {
        if !frame.has_dimensions() {
            return Err(TryOnError::Encoding(format!(
                "frame has no usable dimensions ({}x{}, {} bytes)",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let rgb = Self::to_rgb(frame)?;
        let (width, height) = self.output_size(frame.width, frame.height);
        let scaled = if (width, height) == (frame.width, frame.height) {
            rgb
        } else {
            imageops::resize(&rgb, width, height, FilterType::Triangle)
        };

        let mut buffer = Vec::with_capacity((width * height / 4) as usize);
        JpegEncoder::new_with_quality(&mut buffer, self.config.quality).encode_image(&scaled)?;

        self.frame_count += 1;

        Ok(EncodedFrame {
            data: Bytes::from(buffer),
            width,
            height,
        })
    }

    /// Change the JPEG quality for subsequent frames.
    pub fn set_quality(&mut self, quality: u8) {
        self.config.quality = quality.clamp(1, 100);
    }

    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    // ── Internal helpers ─────────────────────────────────────────

    /// Target size: longest side clamped to `max_dimension`.
    fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        let longest = width.max(height);
        if longest <= self.config.max_dimension {
            return (width, height);
        }
        let scale = self.config.max_dimension as f64 / longest as f64;
        let w = ((width as f64 * scale).round() as u32).max(1);
        let h = ((height as f64 * scale).round() as u32).max(1);
        (w, h)
    }

    /// Pack rows into RGB, dropping padding and alpha.
    fn to_rgb(frame: &RawFrame) -> Result<RgbImage, TryOnError> {
        let bpp = frame.format.bytes_per_pixel();
        let mut out = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);

        for y in 0..frame.height {
            let row = &frame.row(y)[..frame.width as usize * bpp];
            match frame.format {
                PixelFormat::Rgb8 => out.extend_from_slice(row),
                PixelFormat::Rgba8 => {
                    for px in row.chunks_exact(4) {
                        out.extend_from_slice(&px[..3]);
                    }
                }
                PixelFormat::Bgra8 => {
                    for px in row.chunks_exact(4) {
                        out.extend_from_slice(&[px[2], px[1], px[0]]);
                    }
                }
            }
        }

        RgbImage::from_raw(frame.width, frame.height, out)
            .ok_or_else(|| TryOnError::Encoding("pixel buffer size mismatch".into()))
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(EncoderConfig::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(w: u32, h: u32, format: PixelFormat) -> RawFrame {
        let bpp = format.bytes_per_pixel() as u32;
        RawFrame::packed(w, h, format, vec![0x80; (w * h * bpp) as usize])
    }

    #[test]
    fn encodes_jpeg() {
        let mut enc = FrameEncoder::new(EncoderConfig {
            max_dimension: 640,
            quality: 85,
        });
        let encoded = enc.encode(&test_frame(64, 48, PixelFormat::Rgb8)).unwrap();

        // JPEG SOI marker.
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
        assert_eq!((encoded.width, encoded.height), (64, 48));
        assert_eq!(enc.frame_count(), 1);
    }

    #[test]
    fn downscales_longest_side() {
        let mut enc = FrameEncoder::new(EncoderConfig {
            max_dimension: 256,
            quality: 70,
        });
        let encoded = enc.encode(&test_frame(640, 480, PixelFormat::Bgra8)).unwrap();
        assert_eq!((encoded.width, encoded.height), (256, 192));

        let decoded = image::load_from_memory(&encoded.data).unwrap();
        assert_eq!(decoded.width(), 256);
        assert_eq!(decoded.height(), 192);
    }

    #[test]
    fn never_upscales() {
        let mut enc = FrameEncoder::new(EncoderConfig {
            max_dimension: 1024,
            quality: 70,
        });
        let encoded = enc.encode(&test_frame(100, 50, PixelFormat::Rgba8)).unwrap();
        assert_eq!((encoded.width, encoded.height), (100, 50));
    }

    #[test]
    fn handles_row_padding() {
        let mut frame = test_frame(10, 4, PixelFormat::Rgba8);
        frame.stride = 64;
        frame.data = vec![0x10; 64 * 4];
        let mut enc = FrameEncoder::default();
        assert!(enc.encode(&frame).is_ok());
    }

    #[test]
    fn rejects_frame_without_dimensions() {
        let mut enc = FrameEncoder::default();
        let err = enc
            .encode(&RawFrame::packed(0, 0, PixelFormat::Rgb8, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, TryOnError::Encoding(_)));
        assert_eq!(enc.frame_count(), 0);
    }

    #[test]
    fn quality_is_clamped() {
        let mut enc = FrameEncoder::new(EncoderConfig {
            max_dimension: 0,
            quality: 0,
        });
        assert_eq!(enc.config().quality, 1);
        assert_eq!(enc.config().max_dimension, 1);
        enc.set_quality(250);
        assert_eq!(enc.config().quality, 100);
    }
}
