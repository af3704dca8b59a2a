//! Streaming session: the coordinator event loop.
//!
//! A [`StreamSession`] wires the pipeline together:
//!
//! 1. [`Camera`] is acquired and held for the life of the session.
//! 2. The [`Transport`] is opened.
//! 3. On every scheduler tick a frame is sampled, encoded, passed through
//!    the [`AdmissionController`] and dispatched.
//! 4. Transport replies arrive on an `mpsc` channel and are applied by the
//!    [`ResultReconciler`]; counters go to the [`MetricsRecorder`].
//!
//! Everything runs on one task inside a `tokio::select!` loop. The tick
//! handler never awaits the network.
//!
//! State, display and metrics are published on `watch` channels exposed
//! through a cloneable [`SessionHandle`], which is also how a session is
//! stopped from elsewhere.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TryOnError;
use crate::stream::admission::{Admission, AdmissionController, AdmissionPolicy};
use crate::stream::camera::{Camera, CameraHandle};
use crate::stream::encoder::{EncoderConfig, FrameEncoder};
use crate::stream::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::stream::reconciler::{ApplyOutcome, DisplayState, ResultReconciler};
use crate::stream::scheduler::{Capture, CaptureScheduler};
use crate::stream::transport::{Transport, TransportEvent};
use crate::stream::types::FrameOptions;

/// Capacity of the transport → session event channel.
const EVENT_QUEUE: usize = 64;

/// Shortest metrics recompute window.
const MIN_METRICS_WINDOW: Duration = Duration::from_millis(10);

// ── SessionConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Tick interval of the capture scheduler.
    pub cadence: Duration,
    pub admission: AdmissionPolicy,
    /// How long a dispatched job may hold its admission slot.
    pub exchange_timeout: Duration,
    pub encoder: EncoderConfig,
    /// Target descriptor attached to every job.
    pub options: FrameOptions,
    /// Wall-clock interval for recomputing `effective_fps`.
    pub metrics_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_millis(200),
            admission: AdmissionPolicy::SingleFlight,
            exchange_timeout: Duration::from_secs(10),
            encoder: EncoderConfig::default(),
            options: FrameOptions::default(),
            metrics_interval: Duration::from_secs(1),
        }
    }
}

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle of a session.
///
/// ```text
///  Idle ──► Acquiring ──► Active ──► Stopping ──► Idle
///               │            │                     ▲
///               │            └──► Failed ──────────┤
///               └──────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Active,
    Stopping,
    /// The session hit a fatal error; carries the reason.
    Failed(String),
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Acquiring => write!(f, "Acquiring"),
            Self::Active => write!(f, "Active"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_acquire(&mut self) -> Result<(), TryOnError> {
        match self {
            Self::Idle => {
                *self = Self::Acquiring;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot acquire: session not Idle",
            )),
        }
    }

    /// Valid from: `Acquiring`.
    pub fn activate(&mut self) -> Result<(), TryOnError> {
        match self {
            Self::Acquiring => {
                *self = Self::Active;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot activate: session not Acquiring",
            )),
        }
    }

    /// Valid from: `Acquiring` or `Active`.
    pub fn begin_stop(&mut self) -> Result<(), TryOnError> {
        match self {
            Self::Acquiring | Self::Active => {
                *self = Self::Stopping;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot stop: session not Acquiring or Active",
            )),
        }
    }

    /// Valid from: `Active`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TryOnError> {
        match self {
            Self::Active => {
                *self = Self::Failed(reason.into());
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot fail: session not Active",
            )),
        }
    }

    /// Valid from: `Acquiring` (acquisition failed), `Stopping`, `Failed`.
    pub fn reset(&mut self) -> Result<(), TryOnError> {
        match self {
            Self::Acquiring | Self::Stopping | Self::Failed(_) => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot reset: session Idle or Active",
            )),
        }
    }
}

/// What a presentation layer shows as the session status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// User-visible explanation, set on errors.
    pub message: Option<String>,
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable remote control and observer for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: CancellationToken,
    status: watch::Receiver<SessionStatus>,
    display: watch::Receiver<DisplayState>,
    metrics: watch::Receiver<MetricsSnapshot>,
}

impl SessionHandle {
    /// Ask the session to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn display(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    pub fn metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.metrics.clone()
    }

    /// Current state without waiting.
    pub fn state(&self) -> SessionState {
        self.status.borrow().state.clone()
    }
}

// ── SessionSummary ───────────────────────────────────────────────

/// Returned by [`StreamSession::run`] after a clean stop.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub metrics: MetricsSnapshot,
    pub last_applied: Option<u64>,
    /// In-flight jobs abandoned at shutdown.
    pub abandoned: usize,
}

// ── StreamSession ────────────────────────────────────────────────

pub struct StreamSession {
    config: SessionConfig,
    camera: Box<dyn Camera>,
    transport: Box<dyn Transport>,
    state: SessionState,
    status_tx: watch::Sender<SessionStatus>,
    metrics_tx: watch::Sender<MetricsSnapshot>,
    cancel: CancellationToken,
    scheduler: CaptureScheduler,
    encoder: FrameEncoder,
    admission: AdmissionController,
    metrics: MetricsRecorder,
    reconciler: ResultReconciler,
}

impl StreamSession {
    pub fn new(
        config: SessionConfig,
        camera: Box<dyn Camera>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let (metrics_tx, _) = watch::channel(MetricsSnapshot::default());
        Self {
            scheduler: CaptureScheduler::new(config.cadence),
            encoder: FrameEncoder::new(config.encoder),
            admission: AdmissionController::new(config.admission, config.exchange_timeout),
            metrics: MetricsRecorder::new(config.metrics_interval.max(MIN_METRICS_WINDOW)),
            reconciler: ResultReconciler::new(),
            state: SessionState::Idle,
            cancel: CancellationToken::new(),
            status_tx,
            metrics_tx,
            config,
            camera,
            transport,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cancel: self.cancel.clone(),
            status: self.status_tx.subscribe(),
            display: self.reconciler.display_receiver(),
            metrics: self.metrics_tx.subscribe(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the session until stopped or a fatal error occurs.
    ///
    /// Returns `Err` for camera acquisition failures, transport open
    /// failures and connection drops. The camera is released and the
    /// transport closed on every path.
    pub async fn run(mut self) -> Result<SessionSummary, TryOnError> {
        let cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return Ok(self.summary(0));
        }

        // ── Acquiring ────────────────────────────────────────────
        self.state.begin_acquire()?;
        self.publish_status(None);

        let mut camera = match self.camera.acquire() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "camera acquisition failed");
                self.state.reset()?;
                self.publish_status(Some(e.to_string()));
                return Err(e);
            }
        };

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.transport.open(events_tx) => Some(result),
        };
        match opened {
            None => {
                info!("stopped while connecting");
                drop(camera);
                self.transport.close().await;
                self.state.begin_stop()?;
                self.publish_status(None);
                self.state.reset()?;
                self.publish_status(None);
                return Ok(self.summary(0));
            }
            Some(Err(e)) => {
                error!(error = %e, transport = %self.transport.kind(), "transport failed to open");
                drop(camera);
                self.transport.close().await;
                self.state.reset()?;
                self.publish_status(Some(e.to_string()));
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        // ── Active ───────────────────────────────────────────────
        self.state.activate()?;
        self.metrics.reset(Instant::now());
        self.publish_status(None);
        self.publish_metrics();
        info!(
            transport = %self.transport.kind(),
            policy = %self.config.admission,
            cadence_ms = self.scheduler.cadence().as_millis() as u64,
            "session active"
        );

        let mut ticks = self.scheduler.interval();
        let period = self.config.metrics_interval.max(MIN_METRICS_WINDOW);
        let mut recompute = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        recompute.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let failure = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                event = events_rx.recv() => match event {
                    Some(event) => {
                        if let Some(reason) = self.on_event(event) {
                            break Some(reason);
                        }
                    }
                    None => break Some("transport event channel closed".to_string()),
                },
                _ = ticks.tick() => self.on_tick(camera.as_mut()),
                _ = recompute.tick() => {
                    let fps = self.metrics.recompute(Instant::now());
                    debug!(fps, in_flight = self.admission.in_flight(), "metrics window");
                    self.publish_metrics();
                }
            }
        };

        // ── Teardown ─────────────────────────────────────────────
        match &failure {
            None => self.state.begin_stop()?,
            Some(reason) => {
                error!(%reason, "session failed");
                self.state.fail(reason.clone())?;
            }
        }
        self.publish_status(failure.clone());

        drop(camera);
        self.transport.close().await;
        let abandoned = self.admission.abandon_all();
        self.reconciler.close();
        self.publish_metrics();

        self.state.reset()?;
        self.publish_status(failure.clone());
        info!(abandoned, "session ended");

        match failure {
            None => Ok(self.summary(abandoned)),
            Some(reason) => Err(TryOnError::ConnectionDrop(reason)),
        }
    }

    // ── Tick ─────────────────────────────────────────────────────

    fn on_tick(&mut self, camera: &mut dyn CameraHandle) {
        let now = Instant::now();
        for sequence in self.admission.expire(now) {
            warn!(sequence, timeout = ?self.config.exchange_timeout, "job timed out");
            self.transport.abandon(sequence);
            self.metrics.on_failed();
            let reason = TryOnError::Timeout(self.config.exchange_timeout).to_string();
            self.reconciler.record_failure(sequence, &reason);
        }

        if !self.state.is_active() {
            return;
        }

        let mut job = match self
            .scheduler
            .capture(camera, &mut self.encoder, &self.config.options)
        {
            Capture::NotReady => return,
            Capture::Job(job) => job,
            Capture::Failed { sequence, error } => {
                warn!(sequence, %error, "frame encoding failed");
                self.metrics.on_captured();
                self.metrics.on_failed();
                self.reconciler.record_failure(sequence, &error.to_string());
                self.publish_metrics();
                return;
            }
        };
        self.metrics.on_captured();

        let sequence = job.sequence;
        match self.admission.try_admit(&mut job, now) {
            Admission::Dropped => self.metrics.on_dropped(),
            Admission::Accepted => {
                if let Err(e) = self.transport.dispatch(job) {
                    warn!(sequence, error = %e, "dispatch failed");
                    self.admission.complete(sequence, now);
                    self.metrics.on_failed();
                    self.reconciler.record_failure(sequence, &e.to_string());
                }
            }
        }
        self.publish_metrics();
    }

    // ── Transport events ─────────────────────────────────────────

    /// Handle one transport event. Returns a reason if the session must
    /// end.
    fn on_event(&mut self, event: TransportEvent) -> Option<String> {
        let now = Instant::now();
        match event {
            TransportEvent::Completed { job, result } => {
                let sequence = job.sequence;
                let Some(rtt) = self.admission.complete(sequence, now) else {
                    debug!(sequence, "reply for a released job; discarding");
                    return None;
                };
                self.metrics.on_completed(now);
                self.metrics.record_latency(rtt);
                match self.reconciler.apply(result) {
                    ApplyOutcome::Applied => {
                        debug!(sequence, rtt_ms = rtt.as_millis() as u64, "result applied")
                    }
                    ApplyOutcome::AdvisoryOnly => {
                        let advisory = &self.reconciler.state().advisory;
                        debug!(sequence, ?advisory, "advisory result")
                    }
                    ApplyOutcome::Stale | ApplyOutcome::Closed => {}
                }
                self.publish_metrics();
                None
            }
            TransportEvent::Failed { job, reason } => {
                let sequence = job.sequence;
                if self.admission.complete(sequence, now).is_none() {
                    debug!(sequence, "failure for a released job; ignoring");
                    return None;
                }
                warn!(sequence, %reason, "frame failed");
                self.metrics.on_failed();
                self.reconciler.record_failure(sequence, &reason);
                self.publish_metrics();
                None
            }
            TransportEvent::Closed { reason } => Some(reason),
        }
    }

    // ── Publishing ───────────────────────────────────────────────

    fn publish_status(&self, message: Option<String>) {
        self.status_tx.send_replace(SessionStatus {
            state: self.state.clone(),
            message,
        });
    }

    fn publish_metrics(&self) {
        self.metrics_tx
            .send_replace(self.metrics.snapshot(self.admission.in_flight()));
    }

    fn summary(&self, abandoned: usize) -> SessionSummary {
        SessionSummary {
            metrics: self.metrics.snapshot(self.admission.in_flight()),
            last_applied: self.reconciler.last_applied(),
            abandoned,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
