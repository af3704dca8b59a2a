//! Processing tier presets.
//!
//! A tier bundles the transport, endpoint, resolution, quality and pacing
//! that belong together for one accuracy/latency tradeoff.

use std::str::FromStr;
use std::time::Duration;

use crate::error::TryOnError;
use crate::stream::admission::AdmissionPolicy;
use crate::stream::encoder::EncoderConfig;
use crate::stream::session::SessionConfig;
use crate::stream::transport::TransportKind;
use crate::stream::types::FrameOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingTier {
    /// One high-quality still, one exchange.
    SingleImage,
    /// Low resolution over the persistent channel.
    Realtime,
    /// Request/response streaming at medium resolution.
    #[default]
    HighAccuracy,
}

impl ProcessingTier {
    pub const ALL: [ProcessingTier; 3] = [
        ProcessingTier::SingleImage,
        ProcessingTier::Realtime,
        ProcessingTier::HighAccuracy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SingleImage => "single-image",
            Self::Realtime => "realtime",
            Self::HighAccuracy => "high-accuracy",
        }
    }

    pub fn transport(self) -> TransportKind {
        match self {
            Self::Realtime => TransportKind::Channel,
            Self::SingleImage | Self::HighAccuracy => TransportKind::Exchange,
        }
    }

    /// Path appended to the server base URL.
    pub fn endpoint_path(self) -> &'static str {
        match self {
            Self::SingleImage => "/single-tryon",
            Self::Realtime => "/websocket-tryon",
            Self::HighAccuracy => "/tryon",
        }
    }

    pub fn encoder(self) -> EncoderConfig {
        match self {
            Self::SingleImage => EncoderConfig {
                max_dimension: 640,
                quality: 95,
            },
            Self::Realtime => EncoderConfig {
                max_dimension: 256,
                quality: 70,
            },
            Self::HighAccuracy => EncoderConfig {
                max_dimension: 320,
                quality: 60,
            },
        }
    }

    pub fn cadence(self) -> Duration {
        match self {
            Self::Realtime => Duration::from_millis(100),
            Self::SingleImage | Self::HighAccuracy => Duration::from_millis(200),
        }
    }

    pub fn admission(self) -> AdmissionPolicy {
        match self {
            Self::Realtime => AdmissionPolicy::BoundedQueue(2),
            Self::SingleImage | Self::HighAccuracy => AdmissionPolicy::SingleFlight,
        }
    }

    /// `false` for tiers that take a single snapshot instead of streaming.
    pub fn is_streaming(self) -> bool {
        !matches!(self, Self::SingleImage)
    }

    /// Full endpoint URL from the HTTP and WebSocket base URLs.
    pub fn endpoint(self, http_base: &str, ws_base: &str) -> String {
        let base = match self.transport() {
            TransportKind::Exchange => http_base,
            TransportKind::Channel => ws_base,
        };
        format!("{}{}", base.trim_end_matches('/'), self.endpoint_path())
    }

    /// Session settings for this tier.
    pub fn session_config(self, options: FrameOptions) -> SessionConfig {
        SessionConfig {
            cadence: self.cadence(),
            admission: self.admission(),
            encoder: self.encoder(),
            options,
            ..SessionConfig::default()
        }
    }
}

impl std::fmt::Display for ProcessingTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcessingTier {
    type Err = TryOnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| TryOnError::Other(format!("unknown processing tier '{s}'")))
    }
}
