//! Configuration for the try-on camera client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tryon_core::stream::catalog;
use tryon_core::stream::scheduler::MIN_CADENCE;
use tryon_core::{AdmissionPolicy, Calibration, FrameOptions, ProcessingTier, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote service endpoints.
    pub server: ServerConfig,
    /// Camera and encoding settings.
    pub capture: CaptureConfig,
    /// Selected try-on target.
    pub target: TargetConfig,
    /// Backpressure toward the service.
    pub admission: AdmissionConfig,
    /// Where results go.
    pub output: OutputConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Remote service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL for HTTP exchanges.
    pub base_url: String,
    /// Base URL for the WebSocket channel.
    pub ws_url: String,
    /// Per-exchange timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Camera and encoding settings. Zero means "use the tier default".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Processing tier: "single-image", "realtime", "high-accuracy".
    pub tier: String,
    /// Tick interval in milliseconds.
    pub cadence_ms: u64,
    /// Longest side of uploaded frames in pixels.
    pub max_dimension: u32,
    /// JPEG quality 1..=100.
    pub jpeg_quality: u8,
    /// Frame source: "synthetic" or "images".
    pub source: String,
    /// Directory of still images for the "images" source.
    pub image_dir: String,
    /// Synthetic source width.
    pub width: u32,
    /// Synthetic source height.
    pub height: u32,
    /// Samples the synthetic source reports no dimensions for.
    pub warmup_frames: u32,
    /// How long a snapshot waits for the first frame, in milliseconds.
    pub first_frame_wait_ms: u64,
}

/// Selected try-on target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Catalog id, forwarded verbatim.
    pub product_id: String,
    /// Overrides the catalog kind; required for ids not in the catalog.
    pub product_type: String,
    /// Ask the service to draw measurements.
    pub show_measurements: bool,
    /// Physical frame size; overrides the catalog's.
    pub calibration: Option<Calibration>,
}

/// Backpressure toward the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// "single-flight", "bounded-queue", or empty for the tier default.
    pub policy: String,
    /// Depth for "bounded-queue".
    pub queue_depth: usize,
}

/// Where results go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path the latest overlay image is written to. Empty disables it.
    pub latest_image: String,
    /// How often the metrics line is logged, in milliseconds.
    pub report_interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            ws_url: "ws://localhost:8000".into(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tier: ProcessingTier::HighAccuracy.name().into(),
            cadence_ms: 0,
            max_dimension: 0,
            jpeg_quality: 0,
            source: "synthetic".into(),
            image_dir: String::new(),
            width: 640,
            height: 480,
            warmup_frames: 3,
            first_frame_wait_ms: 2_000,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            product_id: "product_1".into(),
            product_type: String::new(),
            show_measurements: false,
            calibration: None,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            policy: String::new(),
            queue_depth: 2,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            latest_image: String::new(),
            report_interval_ms: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Configured tier; unknown names fall back to the default tier.
    pub fn tier(&self) -> ProcessingTier {
        self.capture.tier.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "unknown tier '{}'; using {}",
                self.capture.tier,
                ProcessingTier::default()
            );
            ProcessingTier::default()
        })
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.server.timeout_ms.max(100))
    }

    /// Target options. Catalog ids pick up kind and calibration from the
    /// catalog; other ids are forwarded as given.
    pub fn frame_options(&self) -> FrameOptions {
        let target = &self.target;
        let mut options = match catalog::find(&target.product_id) {
            Some(entry) => FrameOptions::for_target(entry, target.show_measurements),
            None => FrameOptions {
                product_id: target.product_id.clone(),
                show_measurements: target.show_measurements,
                ..FrameOptions::default()
            },
        };
        if !target.product_type.is_empty() {
            options.product_type = target.product_type.clone();
        }
        if target.calibration.is_some() {
            options.calibration = target.calibration.clone();
        }
        options
    }

    fn admission_policy(&self, tier: ProcessingTier) -> AdmissionPolicy {
        match self.admission.policy.trim().to_ascii_lowercase().as_str() {
            "single-flight" | "single_flight" => AdmissionPolicy::SingleFlight,
            "bounded-queue" | "bounded_queue" => {
                AdmissionPolicy::BoundedQueue(self.admission.queue_depth.max(1))
            }
            _ => tier.admission(),
        }
    }

    /// Build the session settings for `tier`, applying overrides.
    pub fn to_session_config(&self, tier: ProcessingTier) -> SessionConfig {
        let mut config = tier.session_config(self.frame_options());

        if self.capture.cadence_ms > 0 {
            config.cadence = Duration::from_millis(self.capture.cadence_ms).max(MIN_CADENCE);
        }
        if self.capture.max_dimension > 0 {
            config.encoder.max_dimension = self.capture.max_dimension;
        }
        if self.capture.jpeg_quality > 0 {
            config.encoder.quality = self.capture.jpeg_quality.clamp(1, 100);
        }
        config.admission = self.admission_policy(tier);
        config.exchange_timeout = self.exchange_timeout();
        config
    }

    pub fn latest_image_path(&self) -> Option<PathBuf> {
        (!self.output.latest_image.is_empty()).then(|| PathBuf::from(&self.output.latest_image))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.output.report_interval_ms.max(100))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        assert!(text.contains("base_url"));
        assert!(text.contains("product_id"));
        assert!(text.contains("tier"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.timeout_ms, 10_000);
        assert_eq!(parsed.target.product_id, "product_1");
        assert_eq!(parsed.tier(), ProcessingTier::HighAccuracy);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: ClientConfig = toml::from_str(
            r#"
            [capture]
            tier = "realtime"

            [target]
            product_id = "product_4"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.tier(), ProcessingTier::Realtime);
        assert_eq!(parsed.server.base_url, "http://localhost:8000");

        let session = parsed.to_session_config(parsed.tier());
        assert_eq!(session.cadence, Duration::from_millis(100));
        assert_eq!(session.admission, AdmissionPolicy::BoundedQueue(2));
        assert_eq!(session.options.product_type, "hat");
    }

    #[test]
    fn to_session_config_clamps() {
        let mut cfg = ClientConfig::default();
        cfg.capture.cadence_ms = 1;
        cfg.capture.jpeg_quality = 250;
        cfg.admission.policy = "bounded-queue".into();
        cfg.admission.queue_depth = 0;

        let session = cfg.to_session_config(ProcessingTier::HighAccuracy);
        assert_eq!(session.cadence, MIN_CADENCE);
        assert_eq!(session.encoder.quality, 100);
        assert_eq!(session.admission, AdmissionPolicy::BoundedQueue(1));
    }

    #[test]
    fn unknown_target_is_forwarded() {
        let mut cfg = ClientConfig::default();
        cfg.target.product_id = "sku-123".into();
        cfg.target.product_type = "hat".into();
        let options = cfg.frame_options();
        assert_eq!(options.product_id, "sku-123");
        assert_eq!(options.product_type, "hat");
    }

    #[test]
    fn unknown_tier_falls_back() {
        let mut cfg = ClientConfig::default();
        cfg.capture.tier = "warp".into();
        assert_eq!(cfg.tier(), ProcessingTier::HighAccuracy);
    }
}
