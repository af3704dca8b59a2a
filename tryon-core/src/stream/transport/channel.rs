//! Persistent-channel transport over a WebSocket.
//!
//! One connection is opened per session and kept for its whole life.
//! Frames are pushed as tagged JSON text messages; replies arrive
//! asynchronously and possibly out of order, and are matched back to their
//! job by the echoed `sequence`. A reply that does not echo a sequence is
//! matched to the oldest outstanding job.
//!
//! A job abandoned after a timeout keeps its place in the queue as a
//! marker, so its late reply is consumed by the marker instead of being
//! matched to the next job. An echoed sequence clears every older marker.
//!
//! Two tasks own the socket halves:
//!
//! - **writer**: drains a bounded outbound queue into the sink.
//! - **reader**: demultiplexes inbound messages into [`TransportEvent`]s.
//!
//! If the socket closes without [`Transport::close`] having been called,
//! the reader emits [`TransportEvent::Closed`]. There is no reconnect.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::TryOnError;
use crate::stream::transport::{Transport, TransportEvent, TransportKind};
use crate::stream::types::{FrameJob, ProcessingResult};
use crate::stream::wire::{self, ChannelInbound, ChannelOutbound};

/// Outbound messages buffered ahead of the socket.
const OUTBOUND_QUEUE: usize = 16;

/// How long `close` waits for the socket tasks before aborting them.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ── ChannelPhase ─────────────────────────────────────────────────

/// Connection sub-state of the persistent channel.
///
/// ```text
///  Closed ──► Connecting ──► Open ──► Closing ──► Closed
///                  │                                 ▲
///                  └─────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPhase {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

impl std::fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ChannelPhase {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Closed`.
    pub fn begin_connect(&mut self) -> Result<(), TryOnError> {
        match self {
            Self::Closed => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot connect: channel not Closed",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn mark_open(&mut self) -> Result<(), TryOnError> {
        match self {
            Self::Connecting => {
                *self = Self::Open;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot open: channel not Connecting",
            )),
        }
    }

    /// Valid from: `Connecting` or `Open`.
    pub fn begin_close(&mut self) -> Result<(), TryOnError> {
        match self {
            Self::Connecting | Self::Open => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(TryOnError::InvalidTransition(
                "cannot close: channel not Connecting or Open",
            )),
        }
    }

    /// Always valid; the socket can vanish from any phase.
    pub fn mark_closed(&mut self) {
        *self = Self::Closed;
    }
}

// ── ChannelTransport ─────────────────────────────────────────────

/// One entry of the reply queue, oldest first.
#[derive(Debug)]
enum Slot {
    /// Sent and awaiting its reply.
    Waiting(FrameJob),
    /// Timed out; its reply, if it ever comes, is discarded.
    Abandoned(u64),
}

impl Slot {
    fn sequence(&self) -> u64 {
        match self {
            Slot::Waiting(job) => job.sequence,
            Slot::Abandoned(sequence) => *sequence,
        }
    }
}

type Pending = Arc<Mutex<VecDeque<Slot>>>;

pub struct ChannelTransport {
    url: String,
    phase: Arc<watch::Sender<ChannelPhase>>,
    outbound: Option<mpsc::Sender<Message>>,
    /// Dispatched jobs awaiting a reply, oldest first.
    pending: Pending,
    /// Set while an intentional close is in progress.
    closing: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl ChannelTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (phase, _) = watch::channel(ChannelPhase::Closed);
        Self {
            url: url.into(),
            phase: Arc::new(phase),
            outbound: None,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            closing: Arc::new(AtomicBool::new(false)),
            writer: None,
            reader: None,
        }
    }

    pub fn phase(&self) -> ChannelPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn phase_receiver(&self) -> watch::Receiver<ChannelPhase> {
        self.phase.subscribe()
    }

    /// Jobs sent and not yet answered.
    pub fn pending(&self) -> usize {
        lock(&self.pending)
            .iter()
            .filter(|slot| matches!(slot, Slot::Waiting(_)))
            .count()
    }

    fn transition(
        &self,
        f: impl FnOnce(&mut ChannelPhase) -> Result<(), TryOnError>,
    ) -> Result<(), TryOnError> {
        let mut result = Ok(());
        self.phase.send_modify(|phase| result = f(phase));
        result
    }
}

fn lock(pending: &Pending) -> MutexGuard<'_, VecDeque<Slot>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for ChannelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Channel
    }

    async fn open(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<(), TryOnError> {
        self.transition(ChannelPhase::begin_connect)?;
        self.closing.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();

        info!(url = %self.url, "connecting channel");
        let socket = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                self.phase.send_modify(ChannelPhase::mark_closed);
                return Err(e.into());
            }
        };
        self.transition(ChannelPhase::mark_open)?;
        info!(url = %self.url, "channel open");

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        // ── Writer task ──────────────────────────────────────────
        self.writer = Some(tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "channel write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        }));

        // ── Reader task ──────────────────────────────────────────
        let pending = self.pending.clone();
        let closing = self.closing.clone();
        let phase = self.phase.clone();
        self.reader = Some(tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = demux(&text, &pending) {
                            if events.send(event).await.is_err() {
                                break "session gone".to_string();
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("closed by peer: {}", f.reason))
                            .unwrap_or_else(|| "closed by peer".into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection ended".to_string(),
                }
            };

            phase.send_modify(ChannelPhase::mark_closed);
            if !closing.load(Ordering::SeqCst) {
                warn!(%reason, "channel closed unexpectedly");
                let _ = events.send(TransportEvent::Closed { reason }).await;
            }
        }));

        self.outbound = Some(outbound_tx);
        Ok(())
    }

    fn dispatch(&mut self, mut job: FrameJob) -> Result<(), TryOnError> {
        if !self.phase().is_open() {
            return Err(TryOnError::Transport(format!(
                "channel is {}",
                self.phase()
            )));
        }
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| TryOnError::Transport("channel has no writer".into()))?;

        let sequence = job.sequence;
        let text = ChannelOutbound::frame(&job).to_json()?;
        drop(job.take_payload());

        lock(&self.pending).push_back(Slot::Waiting(job));
        match outbound.try_send(Message::Text(text)) {
            Ok(()) => {
                debug!(sequence, "frame queued on channel");
                Ok(())
            }
            Err(e) => {
                lock(&self.pending).retain(|slot| slot.sequence() != sequence);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => {
                        TryOnError::Transport("channel outbound queue full".into())
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        TryOnError::ConnectionDrop("channel writer stopped".into())
                    }
                })
            }
        }
    }

    fn abandon(&mut self, sequence: u64) {
        let mut pending = lock(&self.pending);
        if let Some(slot) = pending.iter_mut().find(|slot| slot.sequence() == sequence) {
            *slot = Slot::Abandoned(sequence);
        }
    }

    async fn close(&mut self) {
        if self.writer.is_none() && self.reader.is_none() {
            self.phase.send_modify(ChannelPhase::mark_closed);
            return;
        }

        self.closing.store(true, Ordering::SeqCst);
        let _ = self.transition(ChannelPhase::begin_close);

        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.try_send(Message::Close(None));
        }

        for handle in [self.writer.take(), self.reader.take()].into_iter().flatten() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                abort.abort();
            }
        }

        lock(&self.pending).clear();
        self.phase.send_modify(ChannelPhase::mark_closed);
        info!(url = %self.url, "channel closed");
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        for handle in [self.writer.take(), self.reader.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

// ── Demultiplexing ───────────────────────────────────────────────

/// Turn one inbound text message into an event for its job.
fn demux(text: &str, pending: &Pending) -> Option<TransportEvent> {
    let msg = match ChannelInbound::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            // Nothing to correlate by; blame the oldest outstanding job.
            warn!(error = %e, "malformed channel message");
            return correlate(None, pending).map(|job| TransportEvent::failed(job, e.to_string()));
        }
    };

    let job = correlate(msg.sequence(), pending)?;
    let sequence = job.sequence;
    Some(match msg {
        ChannelInbound::ProcessedFrame {
            image_base64,
            quality,
            note,
            ..
        } => match wire::decode_image(image_base64.as_deref()) {
            Ok(None) if note.is_none() => {
                TransportEvent::failed(job, "processed frame carried neither image nor note")
            }
            Ok(image) => TransportEvent::completed(
                job,
                ProcessingResult {
                    sequence,
                    image,
                    quality_tier: quality.unwrap_or_default(),
                    diagnostic: note,
                    measurements: None,
                },
            ),
            Err(e) => TransportEvent::failed(job, e.to_string()),
        },
        ChannelInbound::Error { error, .. } => TransportEvent::failed(job, error),
    })
}

/// Resolve the job a message belongs to. `None` means the message is
/// dropped: unsolicited, or the late reply of an abandoned job.
fn correlate(echoed: Option<u64>, pending: &Pending) -> Option<FrameJob> {
    let mut pending = lock(pending);
    let slot = match echoed {
        Some(sequence) => {
            let slot = pending
                .iter()
                .position(|slot| slot.sequence() == sequence)
                .and_then(|index| pending.remove(index));
            // A peer that echoes sequences never needs older markers.
            pending.retain(|slot| !matches!(slot, Slot::Abandoned(s) if *s < sequence));
            slot
        }
        None => pending.pop_front(),
    };

    match slot {
        Some(Slot::Waiting(job)) => Some(job),
        Some(Slot::Abandoned(sequence)) => {
            debug!(sequence, "discarding late reply for abandoned job");
            None
        }
        None => {
            debug!(?echoed, "unsolicited channel message");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
