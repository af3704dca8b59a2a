//! Integration tests: full session lifecycles over real localhost
//! sockets, for both the HTTP exchange and the WebSocket channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tryon_core::stream::{
    AdmissionPolicy, Camera, CameraHandle, ChannelTransport, ExchangeTransport, FrameOptions,
    RawFrame, SessionConfig, SessionState, SnapshotRequest, StreamSession, SyntheticCamera,
    capture_snapshot,
};
use tryon_core::{ProcessingTier, TryOnError};

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

async fn ephemeral_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("127.0.0.1:{}", addr.port()))
}

/// Camera that counts open handles.
struct CountingCamera {
    inner: SyntheticCamera,
    open: Arc<AtomicUsize>,
}

impl CountingCamera {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let open = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: SyntheticCamera::new(64, 48),
                open: open.clone(),
            },
            open,
        )
    }
}

struct CountingHandle {
    inner: Box<dyn CameraHandle>,
    open: Arc<AtomicUsize>,
}

impl Camera for CountingCamera {
    fn acquire(&mut self) -> Result<Box<dyn CameraHandle>, TryOnError> {
        let inner = self.inner.acquire()?;
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingHandle {
            inner,
            open: self.open.clone(),
        }))
    }
}

impl CameraHandle for CountingHandle {
    fn sample(&mut self) -> Option<RawFrame> {
        self.inner.sample()
    }
}

impl Drop for CountingHandle {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

fn session_config(admission: AdmissionPolicy) -> SessionConfig {
    SessionConfig {
        cadence: Duration::from_millis(20),
        admission,
        exchange_timeout: Duration::from_secs(30),
        ..SessionConfig::default()
    }
}

fn image_json(tag: &str) -> String {
    format!(
        r#"{{"image_base64":"{}","quality":"60%"}}"#,
        STANDARD.encode(tag)
    )
}

// ── Minimal HTTP responder ───────────────────────────────────────

/// One canned reply: status, JSON body, delay before answering.
#[derive(Clone)]
struct Reply {
    status: u16,
    body: String,
    delay: Duration,
}

impl Reply {
    fn ok(body: String) -> Self {
        Self {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }
}

/// Read one HTTP request; returns the raw request text.
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = head.lines().find_map(|line| {
        line.strip_prefix("content-length:")
            .and_then(|v| v.trim().parse::<usize>().ok())
    });

    loop {
        let body = &buf[header_end..];
        let done = match content_length {
            Some(len) => body.len() >= len,
            None => body.ends_with(b"0\r\n\r\n") || body.ends_with(b"--\r\n"),
        };
        if done {
            break;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Serve HTTP requests; `reply` picks the answer by request index.
/// Every request text is forwarded on the returned channel.
async fn spawn_http<F>(reply: F) -> (String, mpsc::UnboundedReceiver<String>)
where
    F: Fn(usize) -> Reply + Send + Sync + 'static,
{
    let (listener, addr) = ephemeral_listener().await;
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let reply = Arc::new(reply);
    let counter = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let reply = reply.clone();
            let counter = counter.clone();
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let _ = seen_tx.send(request);
                let r = reply(index);
                tokio::time::sleep(r.delay).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    r.status,
                    r.body.len(),
                    r.body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), seen_rx)
}

// ── Exchange sessions ────────────────────────────────────────────

#[tokio::test]
async fn test_exchange_session_lifecycle() {
    let (base, mut seen) = spawn_http(|_| Reply::ok(image_json("overlay"))).await;
    let (camera, open) = CountingCamera::new();

    let config = SessionConfig {
        options: FrameOptions {
            show_measurements: true,
            ..FrameOptions::default()
        },
        ..session_config(AdmissionPolicy::SingleFlight)
    };
    let transport =
        ExchangeTransport::new(format!("{base}/tryon"), Duration::from_secs(5)).unwrap();
    let session = StreamSession::new(config, Box::new(camera), Box::new(transport));
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let mut display = handle.display();
    tokio::time::timeout(WAIT, display.wait_for(|d| d.last_applied.unwrap_or(0) >= 3))
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(open.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state(), SessionState::Active);

    handle.stop();
    let summary = tokio::time::timeout(WAIT, task)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();

    let m = &summary.metrics;
    assert!(m.frames_completed >= 3);
    assert_eq!(
        m.frames_captured,
        m.frames_completed + m.frames_dropped + m.frames_failed + summary.abandoned as u64
    );
    assert_eq!(open.load(Ordering::SeqCst), 0);
    assert_eq!(handle.state(), SessionState::Idle);

    let request = seen.recv().await.unwrap();
    assert!(request.starts_with("POST /tryon"));
    assert!(request.contains(r#"name="file"; filename="frame.jpg""#));
    assert!(request.contains("image/jpeg"));
    assert!(request.contains(r#"name="product_type""#));
    assert!(request.contains("glasses"));
    assert!(request.contains(r#"name="product_id""#));
    assert!(request.contains("product_1"));
    assert!(request.contains(r#"name="show_measurements""#));
    assert!(request.contains("true"));
}

#[tokio::test]
async fn test_exchange_failure_is_per_frame() {
    let (base, _seen) = spawn_http(|i| {
        if i == 0 {
            Reply {
                status: 500,
                body: "boom".into(),
                delay: Duration::ZERO,
            }
        } else {
            Reply::ok(image_json("ok"))
        }
    })
    .await;

    let transport =
        ExchangeTransport::new(format!("{base}/tryon"), Duration::from_secs(5)).unwrap();
    let session = StreamSession::new(
        session_config(AdmissionPolicy::SingleFlight),
        Box::new(SyntheticCamera::new(32, 32)),
        Box::new(transport),
    );
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let mut metrics = handle.metrics();
    tokio::time::timeout(
        WAIT,
        metrics.wait_for(|m| m.frames_failed >= 1 && m.frames_completed >= 1),
    )
    .await
    .expect("timeout")
    .unwrap();
    assert_eq!(handle.state(), SessionState::Active);

    handle.stop();
    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.metrics.frames_failed, 1);
}

#[tokio::test]
async fn test_no_face_keeps_previous_image() {
    let (base, _seen) = spawn_http(|i| {
        if i == 0 {
            Reply::ok(image_json("face"))
        } else {
            Reply::ok(r#"{"note":"no_face"}"#.into())
        }
    })
    .await;

    let transport =
        ExchangeTransport::new(format!("{base}/tryon"), Duration::from_secs(5)).unwrap();
    let session = StreamSession::new(
        session_config(AdmissionPolicy::SingleFlight),
        Box::new(SyntheticCamera::new(32, 32)),
        Box::new(transport),
    );
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let mut display = handle.display();
    tokio::time::timeout(WAIT, display.wait_for(|d| d.last_applied.unwrap_or(0) >= 2))
        .await
        .expect("timeout")
        .unwrap();
    {
        let state = display.borrow();
        assert_eq!(state.image.as_deref(), Some(&b"face"[..]));
        assert_eq!(state.advisory.as_deref(), Some("no_face"));
    }

    handle.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_during_in_flight_exchange() {
    let (base, _seen) = spawn_http(|_| Reply {
        status: 200,
        body: image_json("never"),
        delay: Duration::from_secs(30),
    })
    .await;
    let (camera, open) = CountingCamera::new();

    let transport =
        ExchangeTransport::new(format!("{base}/tryon"), Duration::from_secs(60)).unwrap();
    let session = StreamSession::new(
        session_config(AdmissionPolicy::SingleFlight),
        Box::new(camera),
        Box::new(transport),
    );
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let mut metrics = handle.metrics();
    tokio::time::timeout(WAIT, metrics.wait_for(|m| m.in_flight == 1 && m.frames_dropped >= 1))
        .await
        .expect("timeout")
        .unwrap();

    handle.stop();
    let summary = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("stop must not wait for the exchange")
        .unwrap()
        .unwrap();

    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.metrics.frames_completed, 0);
    assert_eq!(open.load(Ordering::SeqCst), 0);
    assert_eq!(handle.metrics().borrow().in_flight, 0);
}

#[tokio::test]
async fn test_snapshot_single_exchange() {
    let (base, mut seen) = spawn_http(|_| Reply::ok(image_json("still"))).await;
    let tier = ProcessingTier::SingleImage;
    let mut camera = SyntheticCamera::new(1280, 720).with_warmup(2);

    let request = SnapshotRequest {
        endpoint: tier.endpoint(&base, "ws://unused"),
        encoder: tier.encoder(),
        options: FrameOptions::default(),
        timeout: Duration::from_secs(5),
        first_frame_wait: Duration::from_secs(1),
    };
    let result = capture_snapshot(&mut camera, &request).await.unwrap();

    assert_eq!(result.image.as_deref(), Some(&b"still"[..]));
    assert_eq!(result.quality_tier, "60%");
    let req = seen.recv().await.unwrap();
    assert!(req.starts_with("POST /single-tryon"));
}

// ── Channel sessions ─────────────────────────────────────────────

/// Accept one WebSocket client and hand it to `serve`. The returned
/// receiver fires when the client connection has ended.
async fn spawn_ws<F, Fut>(serve: F) -> (String, oneshot::Receiver<()>)
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (listener, addr) = ephemeral_listener().await;
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        serve(ws).await;
        let _ = done_tx.send(());
    });
    (format!("ws://{addr}/websocket-tryon"), done_rx)
}

/// Sequence number of an outbound frame message.
fn frame_sequence(msg: &Message) -> Option<u64> {
    let Message::Text(text) = msg else {
        return None;
    };
    let json: serde_json::Value = serde_json::from_str(text).ok()?;
    assert_eq!(json["type"], "frame");
    assert!(json["image_base64"].as_str().is_some_and(|s| !s.is_empty()));
    json["sequence"].as_u64()
}

fn processed(sequence: Option<u64>, tag: &str) -> Message {
    let mut json = serde_json::json!({
        "type": "processed_frame",
        "image_base64": STANDARD.encode(tag),
        "quality": "70%",
    });
    if let Some(seq) = sequence {
        json["sequence"] = seq.into();
    }
    Message::Text(json.to_string())
}

#[tokio::test]
async fn test_channel_out_of_order_replies() {
    let (url, done) = spawn_ws(|mut ws| async move {
        let mut first = Vec::new();
        while first.len() < 2 {
            match ws.next().await {
                Some(Ok(msg)) => first.extend(frame_sequence(&msg)),
                _ => return,
            }
        }
        // Answer the newer frame first.
        ws.send(processed(Some(first[1]), "nine")).await.unwrap();
        ws.send(processed(Some(first[0]), "eight")).await.unwrap();

        // Drain until the client closes.
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
    .await;

    let (camera, open) = CountingCamera::new();
    let session = StreamSession::new(
        session_config(AdmissionPolicy::BoundedQueue(2)),
        Box::new(camera),
        Box::new(ChannelTransport::new(url)),
    );
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let mut metrics = handle.metrics();
    tokio::time::timeout(WAIT, metrics.wait_for(|m| m.frames_completed >= 2))
        .await
        .expect("timeout")
        .unwrap();

    {
        let display = handle.display();
        let state = display.borrow();
        assert_eq!(state.last_applied, Some(2));
        assert_eq!(state.image.as_deref(), Some(&b"nine"[..]));
    }

    handle.stop();
    let summary = tokio::time::timeout(WAIT, task)
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    assert_eq!(summary.last_applied, Some(2));
    assert_eq!(open.load(Ordering::SeqCst), 0);
    tokio::time::timeout(WAIT, done)
        .await
        .expect("server should see the connection close")
        .unwrap();
}

#[tokio::test]
async fn test_channel_fifo_correlation_and_advisory() {
    let (url, _done) = spawn_ws(|mut ws| async move {
        let mut answered = 0;
        while let Some(Ok(msg)) = ws.next().await {
            if frame_sequence(&msg).is_none() {
                continue;
            }
            let reply = match answered {
                0 => processed(None, "face"),
                1 => Message::Text(r#"{"type":"processed_frame","note":"no_face"}"#.into()),
                _ => continue,
            };
            answered += 1;
            if ws.send(reply).await.is_err() {
                return;
            }
        }
    })
    .await;

    let session = StreamSession::new(
        session_config(AdmissionPolicy::BoundedQueue(2)),
        Box::new(SyntheticCamera::new(32, 32)),
        Box::new(ChannelTransport::new(url)),
    );
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let mut display = handle.display();
    tokio::time::timeout(WAIT, display.wait_for(|d| d.advisory.is_some()))
        .await
        .expect("timeout")
        .unwrap();
    {
        let state = display.borrow();
        assert_eq!(state.last_applied, Some(2));
        assert_eq!(state.image.as_deref(), Some(&b"face"[..]));
        assert_eq!(state.advisory.as_deref(), Some("no_face"));
    }

    handle.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_channel_late_reply_after_timeout_is_absorbed() {
    let (url, _done) = spawn_ws(|mut ws| async move {
        let mut frames = 0;
        while let Some(Ok(msg)) = ws.next().await {
            if frame_sequence(&msg).is_none() {
                continue;
            }
            frames += 1;
            // Frame 1 is answered only after its successor arrives.
            if frames == 2 {
                let late = processed(None, "late");
                let fresh = processed(None, "fresh");
                if ws.send(late).await.is_err() || ws.send(fresh).await.is_err() {
                    return;
                }
            }
        }
    })
    .await;

    let config = SessionConfig {
        exchange_timeout: Duration::from_millis(150),
        ..session_config(AdmissionPolicy::SingleFlight)
    };
    let session = StreamSession::new(
        config,
        Box::new(SyntheticCamera::new(32, 32)),
        Box::new(ChannelTransport::new(url)),
    );
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let mut display = handle.display();
    tokio::time::timeout(WAIT, display.wait_for(|d| d.image.is_some()))
        .await
        .expect("timeout")
        .unwrap();
    {
        let state = display.borrow();
        assert_eq!(state.image.as_deref(), Some(&b"fresh"[..]));
        assert!(state.last_applied.unwrap() > 1);
    }

    handle.stop();
    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.metrics.frames_completed, 1);
    assert!(summary.metrics.frames_failed >= 1);
}

#[tokio::test]
async fn test_channel_drop_fails_session() {
    let (url, _done) = spawn_ws(|mut ws| async move {
        // Take one frame, then vanish.
        let _ = ws.next().await;
        drop(ws);
    })
    .await;

    let (camera, open) = CountingCamera::new();
    let session = StreamSession::new(
        session_config(AdmissionPolicy::BoundedQueue(2)),
        Box::new(camera),
        Box::new(ChannelTransport::new(url)),
    );
    let handle = session.handle();

    let err = tokio::time::timeout(WAIT, session.run())
        .await
        .expect("timeout")
        .unwrap_err();
    assert!(matches!(err, TryOnError::ConnectionDrop(_)));

    let status = handle.status().borrow().clone();
    assert_eq!(status.state, SessionState::Idle);
    assert!(status.message.is_some());
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_channel_refused_never_activates() {
    let (listener, addr) = ephemeral_listener().await;
    drop(listener);

    let (camera, open) = CountingCamera::new();
    let session = StreamSession::new(
        session_config(AdmissionPolicy::BoundedQueue(2)),
        Box::new(camera),
        Box::new(ChannelTransport::new(format!("ws://{addr}/websocket-tryon"))),
    );
    let handle = session.handle();

    assert!(session.run().await.is_err());
    assert_eq!(handle.state(), SessionState::Idle);
    assert_eq!(open.load(Ordering::SeqCst), 0);
}
