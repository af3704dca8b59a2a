//! JSON shapes exchanged with the remote processor.
//!
//! The request/response transport sends multipart forms and receives an
//! [`ExchangeReply`]. The persistent channel speaks tagged JSON text
//! messages: [`ChannelOutbound`] one way, [`ChannelInbound`] the other.
//! Images travel base64-encoded in both directions.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TryOnError;
use crate::stream::types::{FrameJob, Measurements, ProcessingResult};

// ── Request/response ─────────────────────────────────────────────

/// Body of a successful upload exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeReply {
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub facial_measurements: Option<serde_json::Value>,
    #[serde(default)]
    pub product_dimensions: Option<serde_json::Value>,
    #[serde(default)]
    pub placement_info: Option<serde_json::Value>,
}

impl ExchangeReply {
    /// Convert into the result for `sequence`.
    ///
    /// A reply with neither an image nor a note/status is malformed.
    pub fn into_result(self, sequence: u64) -> Result<ProcessingResult, TryOnError> {
        let image = decode_image(self.image_base64.as_deref())?;
        let diagnostic = self.note.or(self.status);
        if image.is_none() && diagnostic.is_none() {
            return Err(TryOnError::Malformed(
                "reply carried neither image nor note".into(),
            ));
        }

        let measurements = Measurements {
            facial: self.facial_measurements,
            product: self.product_dimensions,
            placement: self.placement_info,
        };

        Ok(ProcessingResult {
            sequence,
            image,
            quality_tier: self.quality.unwrap_or_default(),
            diagnostic,
            measurements: (!measurements.is_empty()).then_some(measurements),
        })
    }
}

// ── Persistent channel ───────────────────────────────────────────

/// Client → service message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelOutbound {
    Frame {
        sequence: u64,
        image_base64: String,
        product_type: String,
        product_id: String,
    },
}

impl ChannelOutbound {
    pub fn frame(job: &FrameJob) -> Self {
        ChannelOutbound::Frame {
            sequence: job.sequence,
            image_base64: STANDARD.encode(&job.payload),
            product_type: job.options.product_type.clone(),
            product_id: job.options.product_id.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, TryOnError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Service → client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelInbound {
    ProcessedFrame {
        #[serde(default)]
        sequence: Option<u64>,
        #[serde(default)]
        image_base64: Option<String>,
        #[serde(default)]
        quality: Option<String>,
        #[serde(default)]
        note: Option<String>,
    },
    Error {
        #[serde(default)]
        sequence: Option<u64>,
        error: String,
    },
}

impl ChannelInbound {
    pub fn parse(text: &str) -> Result<Self, TryOnError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The sequence echoed by the service, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            ChannelInbound::ProcessedFrame { sequence, .. }
            | ChannelInbound::Error { sequence, .. } => *sequence,
        }
    }
}

/// Decode an optional base64 image; an empty string counts as absent.
pub fn decode_image(encoded: Option<&str>) -> Result<Option<Bytes>, TryOnError> {
    match encoded {
        Some(s) if !s.is_empty() => Ok(Some(Bytes::from(STANDARD.decode(s)?))),
        _ => Ok(None),
    }
}

// ── Tests ────────────────────────────────────────────────────────
