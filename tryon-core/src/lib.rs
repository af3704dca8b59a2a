//! # tryon-core
//!
//! Client-side coordination for remote virtual try-on.
//!
//! This crate contains:
//! - **Stream**: the frame streaming coordinator (capture scheduling,
//!   admission control, transports, result reconciliation, metrics) and
//!   the session state machine that wraps it
//! - **Task**: `TaskSet` for tracking spawned exchanges with cancellation
//! - **Error**: `TryOnError`, a typed, `thiserror`-based error hierarchy

pub mod error;
pub mod stream;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::TryOnError;
pub use task::TaskSet;

pub use stream::{
    AdmissionPolicy, Calibration, Camera, CameraHandle, DisplayState, FrameOptions,
    ImageSequenceCamera, MetricsSnapshot, ProcessingResult, ProcessingTier, SessionConfig,
    SessionHandle, SessionState, SessionStatus, SessionSummary, SnapshotRequest, StreamSession,
    SyntheticCamera, Transport, TransportConfig, TransportKind, build_transport,
    capture_snapshot,
};
