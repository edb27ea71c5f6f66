//! WebSocket transport with auto-reconnect.
//!
//! Owns the single duplex link to the unit's `/api/ws` endpoint. A
//! background task connects, forwards every inbound text frame as a
//! [`TransportEvent`], writes outbound frames, and reconnects with
//! exponential backoff whenever the link drops. The event stream only
//! ends when the channel is shut down.
//!
//! # Example
//!
//! ```rust,ignore
//! use amotion_api::transport::{ReconnectConfig, TransportChannel, TransportEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! let url = amotion_api::transport::ws_url(&"http://192.168.0.11/".parse()?)?;
//! let (channel, mut events) = TransportChannel::start(url, ReconnectConfig::default(), CancellationToken::new());
//!
//! while let Some(event) = events.recv().await {
//!     if let TransportEvent::Connected { .. } = event {
//!         channel.send(r#"{"endpoint":"time","args":null,"id":1}"#.into()).await?;
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::Error;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Backoff and wait bounds for the transport.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 2s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,

    /// Bound on a single TCP + WebSocket handshake. Default: 10s.
    pub connect_timeout: Duration,

    /// How long [`TransportChannel::send`] waits for a link. Default: 120s.
    pub send_wait: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_retries: None,
            connect_timeout: Duration::from_secs(10),
            send_wait: Duration::from_secs(120),
        }
    }
}

// ── Link state and events ────────────────────────────────────────────

/// Lifecycle of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Shut down; no further reconnect attempts.
    Closing,
}

/// Items of the receive stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A fresh physical connection is up. Sent before any of its frames.
    Connected { epoch: u64 },
    /// One inbound text frame.
    Frame(String),
    /// The connection with this epoch is gone; a reconnect follows.
    Disconnected { epoch: u64, reason: String },
    /// A connection attempt failed before the handshake completed.
    ConnectFailed { attempt: u32, reason: String },
}

struct OutboundFrame {
    text: String,
    ack: oneshot::Sender<Result<(), Error>>,
}

/// Writer of one live connection.
#[derive(Clone)]
struct Link {
    epoch: u64,
    tx: mpsc::Sender<OutboundFrame>,
}

/// The connection the loop is currently pumping.
struct Current {
    epoch: u64,
    cancel: CancellationToken,
    /// Set by [`TransportChannel::reject`]; the reconnect backs off.
    rejected: bool,
}

// ── TransportChannel ─────────────────────────────────────────────────

/// Handle to the running transport. Cheap to clone.
#[derive(Clone)]
pub struct TransportChannel {
    state: watch::Receiver<LinkState>,
    writer: watch::Receiver<Option<Link>>,
    current: Arc<Mutex<Current>>,
    cancel: CancellationToken,
    send_wait: Duration,
}

impl TransportChannel {
    /// Spawn the connection loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously; consume the
    /// returned receiver to observe it.
    pub fn start(
        url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let (writer_tx, writer_rx) = watch::channel(None);
        let current = Arc::new(Mutex::new(Current {
            epoch: 0,
            cancel: cancel.child_token(),
            rejected: false,
        }));

        let channel = Self {
            state: state_rx,
            writer: writer_rx,
            current: Arc::clone(&current),
            cancel: cancel.clone(),
            send_wait: reconnect.send_wait,
        };

        let shared = LoopShared {
            state_tx,
            writer_tx,
            event_tx,
            current,
        };
        tokio::spawn(async move {
            ws_loop(url, reconnect, shared, cancel).await;
        });

        (channel, event_rx)
    }

    /// Transmit one pre-encoded text frame.
    ///
    /// Waits up to `send_wait` for a connection, then resolves once the
    /// frame has been written. Fails with `ConnectionLost` if the link
    /// drops first.
    pub async fn send(&self, frame: String) -> Result<(), Error> {
        let link = self.wait_for_writer(None).await?;
        Self::write(&link, frame).await
    }

    /// Like [`send`](Self::send), but only on the connection `epoch`.
    ///
    /// Fails with `ConnectionLost` once that connection is gone, even if a
    /// newer one is already up.
    pub async fn send_on(&self, epoch: u64, frame: String) -> Result<(), Error> {
        let link = self.wait_for_writer(Some(epoch)).await?;
        Self::write(&link, frame).await
    }

    async fn write(link: &Link, frame: String) -> Result<(), Error> {
        let (ack_tx, ack_rx) = oneshot::channel();
        link.tx
            .send(OutboundFrame {
                text: frame,
                ack: ack_tx,
            })
            .await
            .map_err(|_| Error::ConnectionLost)?;
        ack_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Drop the current connection; the loop reconnects on its own.
    pub fn force_reconnect(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel
            .cancel();
    }

    /// Drop connection `epoch` and count it as a failed attempt, so the
    /// next reconnect waits with the usual exponential backoff.
    ///
    /// No-op when `epoch` is no longer the current connection.
    pub fn reject(&self, epoch: u64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.epoch != epoch {
            trace!(epoch, current = current.epoch, "ignoring rejection of a replaced connection");
            return;
        }
        current.rejected = true;
        current.cancel.cancel();
    }

    /// Observe the link lifecycle.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == LinkState::Connected
    }

    /// Stop reconnecting and close the socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Resolve once the loop has fully stopped.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == LinkState::Closing).await;
    }

    /// Wait for a live writer; with `epoch`, only that connection's.
    async fn wait_for_writer(&self, epoch: Option<u64>) -> Result<Link, Error> {
        let mut writer = self.writer.clone();
        let wait = async {
            loop {
                let current = writer.borrow_and_update().clone();
                if let Some(link) = current {
                    match epoch {
                        Some(wanted) if link.epoch > wanted => {
                            debug!(epoch = wanted, current = link.epoch, "refusing send on a replaced connection");
                            return Err(Error::ConnectionLost);
                        }
                        Some(wanted) if link.epoch < wanted => {}
                        _ => return Ok(link),
                    }
                }
                if writer.changed().await.is_err() {
                    return Err(Error::Closed);
                }
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Closed),
            result = tokio::time::timeout(self.send_wait, wait) => {
                result.unwrap_or_else(|_| {
                    debug!(wait_secs = self.send_wait.as_secs(), "no connection available for send");
                    Err(Error::Timeout { timeout_secs: self.send_wait.as_secs() })
                })
            }
        }
    }
}

/// Map a unit base URL to its WebSocket endpoint.
///
/// `http(s)://host[:port][/prefix]` becomes `ws(s)://host[:port][/prefix]/api/ws`.
/// `ws`/`wss` URLs are taken verbatim.
pub fn ws_url(base: &Url) -> Result<Url, Error> {
    let scheme = match base.scheme() {
        "ws" | "wss" => return Ok(base.clone()),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported URL scheme '{other}'"
            )));
        }
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme '{scheme}' for {base}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.join("api/ws")?)
}

// ── Background reconnection loop ─────────────────────────────────────

struct LoopShared {
    state_tx: watch::Sender<LinkState>,
    writer_tx: watch::Sender<Option<Link>>,
    event_tx: mpsc::Sender<TransportEvent>,
    current: Arc<Mutex<Current>>,
}

/// Main loop: connect → read/write → on drop, backoff → reconnect.
async fn ws_loop(url: Url, reconnect: ReconnectConfig, shared: LoopShared, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    let mut epoch: u64 = 0;

    loop {
        shared.state_tx.send_replace(LinkState::Connecting);
        info!(url = %url, "Connecting to WebSocket");

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = open(&url, reconnect.connect_timeout) => result,
        };

        let delay = match opened {
            Ok(stream) => {
                epoch += 1;

                let conn_cancel = cancel.child_token();
                *shared
                    .current
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Current {
                    epoch,
                    cancel: conn_cancel.clone(),
                    rejected: false,
                };

                let outcome = run_connection(stream, epoch, &shared, &conn_cancel).await;
                shared.writer_tx.send_replace(None);
                let rejected = shared
                    .current
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .rejected;

                if cancel.is_cancelled() {
                    break;
                }
                shared.state_tx.send_replace(LinkState::Disconnected);

                let reason = match outcome {
                    Ok(()) => "connection closed".to_owned(),
                    Err(Error::Closed) => break,
                    Err(e) => e.to_string(),
                };
                info!(epoch, reason = %reason, "WebSocket disconnected, reconnecting");
                if shared
                    .event_tx
                    .send(TransportEvent::Disconnected { epoch, reason })
                    .await
                    .is_err()
                {
                    break;
                }

                if rejected {
                    let delay = calculate_backoff(attempt, &reconnect);
                    attempt = attempt.saturating_add(1);
                    debug!(epoch, attempt, "connection rejected, backing off");
                    delay
                } else {
                    attempt = 0;
                    reconnect.initial_delay
                }
            }
            Err(e) => {
                shared.state_tx.send_replace(LinkState::Disconnected);
                warn!(error = %e, attempt, "WebSocket connect failed");
                let failed = TransportEvent::ConnectFailed {
                    attempt,
                    reason: e.to_string(),
                };
                if shared.event_tx.send(failed).await.is_err() {
                    break;
                }

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        error!(
                            max_retries = max,
                            "WebSocket reconnection limit reached, giving up"
                        );
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &reconnect);
                attempt = attempt.saturating_add(1);
                delay
            }
        };

        debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    shared.writer_tx.send_replace(None);
    shared.state_tx.send_replace(LinkState::Closing);
    debug!("WebSocket loop exiting");
}

async fn open(url: &Url, connect_timeout: Duration) -> Result<WsStream, Error> {
    let (stream, _response) = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    .map_err(|_| Error::WebSocketConnect(format!("handshake timed out after {connect_timeout:?}")))?
    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    Ok(stream)
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Pump one connection until it drops, is replaced, or shutdown.
async fn run_connection(
    stream: WsStream,
    epoch: u64,
    shared: &LoopShared,
    conn_cancel: &CancellationToken,
) -> Result<(), Error> {
    let (mut write, mut read) = stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);

    // The on-connect notification must precede every frame of this epoch.
    shared
        .event_tx
        .send(TransportEvent::Connected { epoch })
        .await
        .map_err(|_| Error::Closed)?;
    shared.writer_tx.send_replace(Some(Link { epoch, tx: out_tx }));
    shared.state_tx.send_replace(LinkState::Connected);
    info!(epoch, "WebSocket connected");

    let result = loop {
        tokio::select! {
            biased;
            () = conn_cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                break Ok(());
            }
            Some(out) = out_rx.recv() => {
                trace!(frame = %out.text, "sending frame");
                let written = write
                    .send(tungstenite::Message::Text(out.text.into()))
                    .await
                    .map_err(|e| {
                        debug!(error = %e, "WebSocket write failed");
                        Error::ConnectionLost
                    });
                let failed = written.is_err();
                let _ = out.ack.send(written);
                if failed {
                    break Err(Error::ConnectionLost);
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if shared.event_tx.send(TransportEvent::Frame(text.as_str().to_owned())).await.is_err() {
                            break Err(Error::Closed);
                        }
                    }
                    Some(Ok(tungstenite::Message::Binary(bytes))) => {
                        match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                if shared.event_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                    break Err(Error::Closed);
                                }
                            }
                            Err(e) => debug!(error = %e, "dropping undecodable binary frame"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite queues the pong reply itself
                        trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                        } else {
                            info!("WebSocket close frame received (no payload)");
                        }
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        info!("WebSocket stream ended");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    // Refuse new frames, then fail whatever was queued for this link.
    shared.writer_tx.send_replace(None);
    out_rx.close();
    while let Some(out) = out_rx.recv().await {
        let _ = out.ack.send(Err(Error::ConnectionLost));
    }

    result
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff: `min(initial * 2^attempt, max)`.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2_u32.saturating_pow(attempt);
    config
        .initial_delay
        .saturating_mul(factor)
        .min(config.max_delay)
}

// ── Tests ────────────────────────────────────────────────────────────
