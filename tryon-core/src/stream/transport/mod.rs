//! Transport strategies toward the remote processor.
//!
//! | Kind | Type | Connection |
//! |------|------|------------|
//! | [`TransportKind::Exchange`] | [`ExchangeTransport`] | one HTTP upload per job |
//! | [`TransportKind::Channel`] | [`ChannelTransport`] | one WebSocket per session |
//!
//! Both report back to the session through an `mpsc` channel of
//! [`TransportEvent`]s. [`Transport::dispatch`] never waits for the
//! reply, so the session tick is never blocked by the network.

pub mod channel;
pub mod exchange;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::TryOnError;
use crate::stream::types::{FrameJob, ProcessingResult};

pub use channel::{ChannelPhase, ChannelTransport};
pub use exchange::ExchangeTransport;

// ── TransportEvent ───────────────────────────────────────────────

/// Asynchronous outcome reported by a transport.
///
/// `Completed` and `Failed` hand the job back in its terminal state.
#[derive(Debug)]
pub enum TransportEvent {
    /// A reply correlated to a dispatched job.
    Completed {
        job: FrameJob,
        result: ProcessingResult,
    },
    /// The job failed; the session keeps running.
    Failed { job: FrameJob, reason: String },
    /// The persistent connection closed without being asked to.
    Closed { reason: String },
}

impl TransportEvent {
    /// Finish `job` as `Completed` with `result`.
    pub fn completed(mut job: FrameJob, result: ProcessingResult) -> Self {
        if let Err(e) = job.mark_completed() {
            warn!(sequence = job.sequence, state = ?job.state(), error = %e, "completing job");
        }
        Self::Completed { job, result }
    }

    /// Finish `job` as `Failed`.
    pub fn failed(mut job: FrameJob, reason: impl Into<String>) -> Self {
        if let Err(e) = job.mark_failed() {
            warn!(sequence = job.sequence, state = ?job.state(), error = %e, "failing job");
        }
        Self::Failed {
            job,
            reason: reason.into(),
        }
    }

    /// Sequence of the job this event finishes, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Completed { job, .. } | Self::Failed { job, .. } => Some(job.sequence),
            Self::Closed { .. } => None,
        }
    }
}

// ── TransportKind ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Request/response: one upload exchange per job.
    Exchange,
    /// Persistent duplex channel for the whole session.
    Channel,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exchange => write!(f, "exchange"),
            Self::Channel => write!(f, "channel"),
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Prepare the transport for a session. Events for every dispatched
    /// job are delivered on `events`.
    async fn open(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<(), TryOnError>;

    /// Hand a job to the transport without waiting for the reply.
    ///
    /// An `Err` means the job never left; no event will follow for it.
    fn dispatch(&mut self, job: FrameJob) -> Result<(), TryOnError>;

    /// Stop caring about `sequence` (it timed out). Any later reply for it
    /// is dropped by the session.
    fn abandon(&mut self, sequence: u64);

    /// Close the connection and abort outstanding work. Idempotent.
    async fn close(&mut self);
}

// ── Construction ─────────────────────────────────────────────────

/// Endpoint and limits for building a transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// `http(s)://…` for exchanges, `ws(s)://…` for the channel.
    pub endpoint: String,
    /// Upper bound for a single exchange.
    pub timeout: Duration,
}

/// Build the transport selected by `config.kind`.
pub fn build_transport(config: &TransportConfig) -> Result<Box<dyn Transport>, TryOnError> {
    Ok(match config.kind {
        TransportKind::Exchange => Box::new(ExchangeTransport::new(
            config.endpoint.clone(),
            config.timeout,
        )?),
        TransportKind::Channel => Box::new(ChannelTransport::new(config.endpoint.clone())),
    })
}
