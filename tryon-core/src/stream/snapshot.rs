//! One-shot capture: one frame, one exchange.
//!
//! Used by the single-image tier. The camera is opened, polled until it
//! reports a usable frame, and released once the exchange finishes.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::TryOnError;
use crate::stream::camera::Camera;
use crate::stream::encoder::{EncoderConfig, FrameEncoder};
use crate::stream::transport::exchange;
use crate::stream::types::{FrameOptions, ProcessingResult, RawFrame};

/// Poll spacing while waiting for the first frame.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// Full exchange URL, e.g. `http://host:8000/single-tryon`.
    pub endpoint: String,
    pub encoder: EncoderConfig,
    pub options: FrameOptions,
    /// Upper bound for the exchange.
    pub timeout: Duration,
    /// How long to wait for the camera to report dimensions.
    pub first_frame_wait: Duration,
}

/// Take one snapshot and process it remotely.
pub async fn capture_snapshot(
    camera: &mut dyn Camera,
    request: &SnapshotRequest,
) -> Result<ProcessingResult, TryOnError> {
    let mut handle = camera.acquire()?;
    let frame = first_frame(|| handle.sample(), request.first_frame_wait).await?;

    let encoded = FrameEncoder::new(request.encoder).encode(&frame)?;
    debug!(
        width = encoded.width,
        height = encoded.height,
        bytes = encoded.data.len(),
        "snapshot encoded"
    );

    let client = reqwest::Client::builder()
        .timeout(request.timeout)
        .build()
        .map_err(|e| TryOnError::Transport(format!("failed to create HTTP client: {e}")))?;
    let result =
        exchange::exchange(&client, &request.endpoint, 1, encoded.data, &request.options).await;

    drop(handle);
    let result = result?;
    info!(
        has_image = result.image.is_some(),
        note = ?result.diagnostic,
        "snapshot processed"
    );
    Ok(result)
}

async fn first_frame(
    mut sample: impl FnMut() -> Option<RawFrame>,
    wait: Duration,
) -> Result<RawFrame, TryOnError> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(frame) = sample().filter(RawFrame::has_dimensions) {
            return Ok(frame);
        }
        if Instant::now() >= deadline {
            return Err(TryOnError::Acquisition(format!(
                "camera produced no frame within {wait:?}"
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
