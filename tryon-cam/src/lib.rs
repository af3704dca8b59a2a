//! # tryon-cam: Try-On Camera Client
//!
//! Streams camera frames to a remote try-on service and presents the
//! overlays it returns.
//!
//! ## Modes
//!
//! - **Stream**: continuous capture through the configured tier
//!   (HTTP exchanges or the WebSocket channel).
//! - **Snapshot**: one high-quality still through the single-image
//!   endpoint, optionally written to a file.
//! - **Targets**: list the built-in try-on targets.

pub mod config;
pub mod service;
