//! Request/response transport over HTTP multipart uploads.
//!
//! Each admitted job becomes one `POST` carrying the encoded frame and the
//! target options as form fields. The exchange runs in its own task and
//! reports back through the session's event channel, so replies for
//! different jobs may complete in any order.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::TryOnError;
use crate::stream::transport::{Transport, TransportEvent, TransportKind};
use crate::stream::types::{FrameJob, FrameOptions, ProcessingResult};
use crate::stream::wire::ExchangeReply;
use crate::task::TaskSet;

/// Build the multipart form for one frame.
pub fn build_form(payload: Bytes, options: &FrameOptions) -> Result<Form, TryOnError> {
    let file = Part::bytes(payload.to_vec())
        .file_name("frame.jpg")
        .mime_str("image/jpeg")?;

    let mut form = Form::new()
        .part("file", file)
        .text("product_type", options.product_type.clone())
        .text("product_id", options.product_id.clone())
        .text(
            "show_measurements",
            if options.show_measurements { "true" } else { "false" },
        );

    if let Some(calibration) = &options.calibration {
        for (name, value) in calibration.fields() {
            form = form.text(name, value.to_string());
        }
    }
    Ok(form)
}

/// Run a single upload exchange and decode its reply.
pub async fn exchange(
    client: &reqwest::Client,
    url: &str,
    sequence: u64,
    payload: Bytes,
    options: &FrameOptions,
) -> Result<ProcessingResult, TryOnError> {
    let form = build_form(payload, options)?;
    let response = client.post(url).multipart(form).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TryOnError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }

    let reply: ExchangeReply = response.json().await?;
    reply.into_result(sequence)
}

// ── ExchangeTransport ────────────────────────────────────────────

pub struct ExchangeTransport {
    client: reqwest::Client,
    url: String,
    events: Option<mpsc::Sender<TransportEvent>>,
    tasks: TaskSet,
}

impl ExchangeTransport {
    /// `timeout` bounds each exchange end to end.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TryOnError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TryOnError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            events: None,
            tasks: TaskSet::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exchanges whose reply has not arrived yet.
    pub fn outstanding(&self) -> usize {
        self.tasks.running()
    }
}

#[async_trait]
impl Transport for ExchangeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Exchange
    }

    async fn open(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<(), TryOnError> {
        info!(url = %self.url, "exchange transport ready");
        self.events = Some(events);
        Ok(())
    }

    fn dispatch(&mut self, job: FrameJob) -> Result<(), TryOnError> {
        let events = self
            .events
            .clone()
            .ok_or_else(|| TryOnError::Transport("exchange transport is not open".into()))?;
        let client = self.client.clone();
        let url = self.url.clone();
        let sequence = job.sequence;

        debug!(sequence, bytes = job.payload.len(), "starting exchange");
        self.tasks.spawn(sequence, async move {
            let mut job = job;
            let payload = job.take_payload();
            let event = match exchange(&client, &url, sequence, payload, &job.options).await {
                Ok(result) => TransportEvent::completed(job, result),
                Err(e) => {
                    warn!(sequence, error = %e, "exchange failed");
                    TransportEvent::failed(job, e.to_string())
                }
            };
            // The session may already be gone.
            let _ = events.send(event).await;
        });
        Ok(())
    }

    fn abandon(&mut self, sequence: u64) {
        if self.tasks.abort(sequence) {
            debug!(sequence, "exchange aborted");
        }
    }

    async fn close(&mut self) {
        let aborted = self.tasks.abort_all();
        if aborted > 0 {
            info!(aborted, "aborted outstanding exchanges");
        }
        self.events = None;
    }
}
