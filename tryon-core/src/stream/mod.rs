//! # Frame streaming coordinator
//!
//! Feeds camera frames to a remote try-on processor and reconciles the
//! overlays it sends back.
//!
//! ## Architecture
//!
//! ```text
//!              StreamSession (one task, select! loop)
//! ┌──────────────────────────────────────────────────────────────┐
//! │ tick ─► CaptureScheduler ─► FrameEncoder ─► AdmissionController
//! │                                                   │ accepted
//! │                                                   ▼
//! │                                          Transport::dispatch ───┼──► remote
//! │                                                                 │
//! │ TransportEvent ◄── mpsc ◄── exchange tasks / channel reader ◄───┼─── remote
//! │   ├─► ResultReconciler ─► watch<DisplayState>
//! │   └─► MetricsRecorder  ─► watch<MetricsSnapshot>
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sub-modules
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `types`      | Frames, jobs, options and results                    |
//! | `camera`     | Camera sources and their scoped handles              |
//! | `encoder`    | JPEG encoding with downscaling                       |
//! | `scheduler`  | Tick cadence and sequence assignment                 |
//! | `admission`  | Single-flight / bounded-queue admission              |
//! | `transport`  | HTTP exchange and WebSocket channel transports       |
//! | `wire`       | JSON shapes spoken with the remote service           |
//! | `reconciler` | Staleness check and display state                    |
//! | `metrics`    | Counters, effective FPS and latency                  |
//! | `session`    | Session state machine and coordinator loop           |
//! | `tier`       | Processing tier presets                              |
//! | `catalog`    | Built-in try-on targets                              |
//! | `snapshot`   | One-shot single-image capture                        |

pub mod admission;
pub mod camera;
pub mod catalog;
pub mod encoder;
pub mod metrics;
pub mod reconciler;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod tier;
pub mod transport;
pub mod types;
pub mod wire;

// ── Re-exports ───────────────────────────────────────────────────

pub use admission::{Admission, AdmissionController, AdmissionPolicy};
pub use camera::{Camera, CameraHandle, ImageSequenceCamera, SyntheticCamera};
pub use catalog::{Target, TargetKind, TARGETS};
pub use encoder::{EncodedFrame, EncoderConfig, FrameEncoder};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use reconciler::{ApplyOutcome, DisplayState, ResultReconciler};
pub use scheduler::{Capture, CaptureScheduler};
pub use session::{
    SessionConfig, SessionHandle, SessionState, SessionStatus, SessionSummary, StreamSession,
};
pub use snapshot::{SnapshotRequest, capture_snapshot};
pub use tier::ProcessingTier;
pub use transport::{
    ChannelPhase, ChannelTransport, ExchangeTransport, Transport, TransportConfig,
    TransportEvent, TransportKind, build_transport,
};
pub use types::{
    Calibration, FrameJob, FrameOptions, JobState, Measurements, PixelFormat, ProcessingResult,
    RawFrame,
};
