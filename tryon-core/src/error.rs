//! Domain-specific error types for the try-on streaming pipeline.
//!
//! All fallible operations return `Result<T, TryOnError>`.
//! Errors fall into two propagation classes:
//!
//! - **Session-fatal**: camera acquisition and connection drops. These end
//!   the session and are surfaced through its status.
//! - **Per-frame**: transport failures, malformed replies, encoding errors.
//!   These fail a single [`FrameJob`](crate::stream::types::FrameJob) and
//!   are absorbed by the coordinator.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the try-on coordinator.
#[derive(Debug, Error)]
pub enum TryOnError {
    // ── Camera Errors ────────────────────────────────────────────
    /// The camera could not be opened (permission denied, no device).
    #[error("camera acquisition failed: {0}")]
    Acquisition(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// A transport-level failure for a single exchange or message.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote service answered with a non-success status.
    #[error("remote service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// A reply or channel message could not be understood.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The persistent channel closed while the session was active.
    #[error("connection dropped: {0}")]
    ConnectionDrop(String),

    /// An internal mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The socket/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    // ── Encoding Errors ──────────────────────────────────────────
    /// A frame could not be converted or compressed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── State Errors ─────────────────────────────────────────────
    /// A state machine was asked to make a transition it does not allow.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl TryOnError {
    /// Whether this error ends the session rather than a single frame.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            TryOnError::Acquisition(_) | TryOnError::ConnectionDrop(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TryOnError {
    fn from(s: String) -> Self {
        TryOnError::Other(s)
    }
}

impl From<&str> for TryOnError {
    fn from(s: &str) -> Self {
        TryOnError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TryOnError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TryOnError::ChannelClosed
    }
}

impl From<reqwest::Error> for TryOnError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TryOnError::Malformed(e.to_string())
        } else {
            TryOnError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for TryOnError {
    fn from(e: serde_json::Error) -> Self {
        TryOnError::Malformed(e.to_string())
    }
}

impl From<base64::DecodeError> for TryOnError {
    fn from(e: base64::DecodeError) -> Self {
        TryOnError::Malformed(format!("invalid base64 image: {e}"))
    }
}

impl From<image::ImageError> for TryOnError {
    fn from(e: image::ImageError) -> Self {
        TryOnError::Encoding(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TryOnError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TryOnError::ConnectionDrop(e.to_string())
            }
            WsError::Io(io) => TryOnError::Io(io),
            other => TryOnError::Transport(other.to_string()),
        }
    }
}
