//! Client service: builds the pipeline from configuration and presents
//! what the session publishes.
//!
//! The presenter is the stand-in for a UI: it logs status changes,
//! advisories and a periodic metrics line, and can mirror the latest
//! overlay image to a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use tryon_core::stream::camera::{Camera, ImageSequenceCamera, SyntheticCamera};
use tryon_core::{
    ProcessingResult, ProcessingTier, SessionHandle, SessionState, SessionSummary,
    SnapshotRequest, StreamSession, TransportConfig, TryOnError, build_transport,
    capture_snapshot,
};

use crate::config::ClientConfig;

// ── TryOnService ─────────────────────────────────────────────────

pub struct TryOnService {
    config: ClientConfig,
    tier: ProcessingTier,
}

impl TryOnService {
    pub fn new(config: ClientConfig, tier: ProcessingTier) -> Self {
        Self { config, tier }
    }

    pub fn tier(&self) -> ProcessingTier {
        self.tier
    }

    /// Camera selected by `capture.source`.
    pub fn build_camera(&self) -> Box<dyn Camera> {
        let capture = &self.config.capture;
        match capture.source.as_str() {
            "images" => Box::new(ImageSequenceCamera::new(&capture.image_dir)),
            other => {
                if other != "synthetic" {
                    warn!("unknown capture source '{other}'; using synthetic");
                }
                Box::new(
                    SyntheticCamera::new(capture.width, capture.height)
                        .with_warmup(capture.warmup_frames),
                )
            }
        }
    }

    fn endpoint(&self) -> String {
        self.tier
            .endpoint(&self.config.server.base_url, &self.config.server.ws_url)
    }

    /// Build a streaming session for the configured tier.
    pub fn prepare_stream(&self) -> Result<StreamSession, TryOnError> {
        if !self.tier.is_streaming() {
            return Err(TryOnError::Other(format!(
                "tier {} does not stream; use the snapshot command",
                self.tier
            )));
        }

        let transport = build_transport(&TransportConfig {
            kind: self.tier.transport(),
            endpoint: self.endpoint(),
            timeout: self.config.exchange_timeout(),
        })?;
        let session_config = self.config.to_session_config(self.tier);

        info!(
            tier = %self.tier,
            endpoint = %self.endpoint(),
            product_id = %session_config.options.product_id,
            "stream prepared"
        );
        Ok(StreamSession::new(session_config, self.build_camera(), transport))
    }

    /// Run `session` to completion while presenting its output.
    pub async fn run_stream(&self, session: StreamSession) -> Result<SessionSummary, TryOnError> {
        let presenter = tokio::spawn(present(
            session.handle(),
            self.config.latest_image_path(),
            self.config.report_interval(),
        ));

        let result = session.run().await;
        presenter.abort();

        match &result {
            Ok(summary) => {
                let m = &summary.metrics;
                info!(
                    captured = m.frames_captured,
                    completed = m.frames_completed,
                    dropped = m.frames_dropped,
                    failed = m.frames_failed,
                    abandoned = summary.abandoned,
                    last_applied = ?summary.last_applied,
                    "session summary"
                );
            }
            Err(e) => error!("session ended with error: {e}"),
        }
        result
    }

    /// Take one snapshot through the single-image endpoint.
    pub async fn snapshot(&self, out: Option<&Path>) -> Result<ProcessingResult, TryOnError> {
        let tier = ProcessingTier::SingleImage;
        let request = SnapshotRequest {
            endpoint: tier.endpoint(&self.config.server.base_url, &self.config.server.ws_url),
            encoder: self.config.to_session_config(tier).encoder,
            options: self.config.frame_options(),
            timeout: self.config.exchange_timeout(),
            first_frame_wait: Duration::from_millis(self.config.capture.first_frame_wait_ms),
        };

        let mut camera = self.build_camera();
        let result = capture_snapshot(camera.as_mut(), &request).await?;

        if let Some(note) = &result.diagnostic {
            info!("advisory: {note}");
        }
        match (&result.image, out) {
            (Some(image), Some(path)) => {
                tokio::fs::write(path, image).await?;
                info!("overlay written to {}", path.display());
            }
            (None, Some(_)) => warn!("service returned no image; nothing written"),
            _ => {}
        }
        Ok(result)
    }
}

// ── Presenter ────────────────────────────────────────────────────

async fn present(handle: SessionHandle, latest_image: Option<PathBuf>, report_every: Duration) {
    let mut status = handle.status();
    let mut display = handle.display();
    let metrics = handle.metrics();
    let mut report = tokio::time::interval(report_every);
    let mut last_advisory: Option<String> = None;
    let mut last_written: Option<u64> = None;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let s = status.borrow_and_update().clone();
                match (&s.state, &s.message) {
                    (SessionState::Failed(reason), _) => error!("session failed: {reason}"),
                    (state, Some(message)) => warn!("session {state}: {message}"),
                    (state, None) => info!("session {state}"),
                }
            }
            changed = display.changed() => {
                if changed.is_err() {
                    break;
                }
                let d = display.borrow_and_update().clone();
                if d.advisory != last_advisory {
                    if let Some(note) = &d.advisory {
                        info!("advisory: {note}");
                    }
                    last_advisory = d.advisory.clone();
                }
                if let (Some(path), Some(image)) = (&latest_image, &d.image) {
                    if d.last_applied != last_written {
                        if let Err(e) = tokio::fs::write(path, image).await {
                            warn!("cannot write {}: {e}", path.display());
                        }
                        last_written = d.last_applied;
                    }
                }
            }
            _ = report.tick() => {
                let m = metrics.borrow().clone();
                if handle.state().is_active() {
                    info!(
                        fps = m.effective_fps,
                        latency_ms = m.latency.as_millis() as u64,
                        in_flight = m.in_flight,
                        completed = m.frames_completed,
                        dropped = m.frames_dropped,
                        failed = m.frames_failed,
                        "stream"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_image_tier_refuses_to_stream() {
        let service = TryOnService::new(ClientConfig::default(), ProcessingTier::SingleImage);
        assert!(service.prepare_stream().is_err());
    }

    #[test]
    fn streaming_tiers_prepare() {
        for tier in [ProcessingTier::Realtime, ProcessingTier::HighAccuracy] {
            let service = TryOnService::new(ClientConfig::default(), tier);
            let session = service.prepare_stream().unwrap();
            assert_eq!(session.config().cadence, tier.cadence());
        }
    }

    #[tokio::test]
    async fn missing_image_dir_fails_acquisition() {
        let mut config = ClientConfig::default();
        config.capture.source = "images".into();
        config.capture.image_dir = "/no/such/dir".into();
        let service = TryOnService::new(config, ProcessingTier::HighAccuracy);

        let session = service.prepare_stream().unwrap();
        let err = service.run_stream(session).await.unwrap_err();
        assert!(matches!(err, TryOnError::Acquisition(_)));
    }
}
