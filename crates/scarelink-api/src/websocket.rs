//! Persistent WebSocket channel to the actuator board.
//!
//! Opens `ws://host:port/path`, decodes inbound JSON frames into
//! [`SocketEvent`]s on a [`tokio::sync::broadcast`] channel, and writes
//! outbound command frames while the socket is open. After an error or close
//! the channel retries on a fixed delay up to a capped number of attempts,
//! then publishes [`SocketEvent::GaveUp`] and stays down until
//! [`SocketChannel::connect`] is called again.
//!
//! # Example
//!
//! ```rust,ignore
//! use scarelink_api::websocket::{ReconnectConfig, SocketChannel, SocketEvent};
//! use scarelink_api::{DeviceAddress, SocketCommand};
//!
//! let socket = SocketChannel::new();
//! let mut events = socket.subscribe();
//! socket.connect(&DeviceAddress::new("192.168.4.2", 81, "/ws"), ReconnectConfig::default())?;
//!
//! while let Ok(event) = events.recv().await {
//!     if event == SocketEvent::Connected {
//!         socket.send(&SocketCommand::Alarm);
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::address::DeviceAddress;
use crate::error::Error;
use crate::health::{ChannelHealth, HealthTracker};
use crate::telemetry::{DetectionPayload, InboundFrame, TelemetryPayload, parse_frame};

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default reconnect cap after an unsolicited close.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ── SocketEvent ──────────────────────────────────────────────────────

/// Everything the socket channel reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connected,
    Disconnected { reason: String },
    Telemetry(TelemetryPayload),
    Detection(DetectionPayload),
    /// The reconnect cap was reached; no further automatic attempts.
    GaveUp { attempts: u32 },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Fixed-delay reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before every reconnect attempt. Default: 3s.
    pub delay: Duration,

    /// Attempts after an unsolicited close before giving up. Default: 5.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

// ── SocketChannel ────────────────────────────────────────────────────

/// Handle to the actuator board's socket.
///
/// Cheaply cloneable; all clones drive the same connection.
#[derive(Clone)]
pub struct SocketChannel {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    events: broadcast::Sender<SocketEvent>,
    health: HealthTracker,
    /// Set while a handshake is in flight.
    connecting: AtomicBool,
    /// Bumped per `connect()`; stale loops must not touch newer state.
    generation: AtomicU64,
    /// Writer for the currently open session, tagged with its generation.
    outbound: Mutex<Option<(u64, mpsc::UnboundedSender<Message>)>>,
    /// Cancels the running connect/reconnect loop.
    session: Mutex<Option<CancellationToken>>,
    cancel: CancellationToken,
}

impl Default for SocketChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SocketInner {
                events,
                health: HealthTracker::new(),
                connecting: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                outbound: Mutex::new(None),
                session: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Open the socket and spawn the reconnect loop.
    ///
    /// Returns `Ok(false)` without doing anything if a handshake is already
    /// in flight. Otherwise any previous loop is torn down, the attempt
    /// counter is reset, and `Ok(true)` is returned once the new loop is
    /// spawned; the handshake itself completes asynchronously.
    pub fn connect(&self, address: &DeviceAddress, reconnect: ReconnectConfig) -> Result<bool, Error> {
        let url = address.ws_url()?;

        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%url, "socket connect already in flight, ignoring");
            return Ok(false);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = self.inner.cancel.child_token();
        if let Some(previous) = self.inner.lock_session().replace(token.clone()) {
            previous.cancel();
        }
        self.inner.clear_outbound(None);
        self.inner.health.set_attempts(0);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            socket_loop(inner, url, reconnect, token, generation).await;
        });
        Ok(true)
    }

    /// Close the socket and cancel any pending reconnect.
    pub fn disconnect(&self) {
        if let Some(token) = self.inner.lock_session().take() {
            token.cancel();
        }
        self.inner.clear_outbound(None);
        self.inner.connecting.store(false, Ordering::Release);
        if self
            .inner
            .health
            .mark_disconnected(Some("closed by client".into()))
        {
            let _ = self.inner.events.send(SocketEvent::Disconnected {
                reason: "closed by client".into(),
            });
        }
        debug!("socket disconnected by client");
    }

    /// Write one JSON frame if the socket is open.
    ///
    /// Returns whether the write was attempted. Nothing is queued while the
    /// socket is down.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "could not encode socket frame");
                return false;
            }
        };

        let guard = self.inner.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some((_, tx)) => tx.send(Message::text(text)).is_ok(),
            None => {
                debug!("socket not open, dropping frame");
                false
            }
        }
    }

    /// Whether a session is currently open.
    pub fn is_open(&self) -> bool {
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// New receiver for socket events. Subscribe before `connect()` to
    /// observe the first `Connected`.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.inner.events.subscribe()
    }

    pub fn health(&self) -> ChannelHealth {
        self.inner.health.current()
    }

    /// Cancel every loop spawned by this channel, permanently.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.disconnect();
    }
}

impl SocketInner {
    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_outbound(&self, generation: u64, tx: mpsc::UnboundedSender<Message>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some((generation, tx));
    }

    /// Drop the writer; with `Some(generation)` only if it belongs to it.
    fn clear_outbound(&self, generation: Option<u64>) {
        let mut guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let matches = match (generation, guard.as_ref()) {
            (Some(current), Some((owner, _))) => current == *owner,
            (None, _) => true,
            (Some(_), None) => false,
        };
        if matches {
            *guard = None;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Result of one connect-and-read cycle.
struct SessionOutcome {
    opened: bool,
    result: Result<(), Error>,
}

/// Main loop: connect → read → on error or close, wait → reconnect.
async fn socket_loop(
    inner: Arc<SocketInner>,
    url: Url,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut attempts: u32 = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = run_session(&inner, &url, generation) => outcome,
        };

        if outcome.opened {
            attempts = 0;
        }
        inner.clear_outbound(Some(generation));
        if !inner.is_current(generation) {
            break;
        }

        let reason = match outcome.result {
            Ok(()) => "connection closed".to_owned(),
            Err(e) => e.to_string(),
        };
        if inner.health.mark_disconnected(Some(reason.clone())) {
            warn!(%url, %reason, "socket disconnected");
            let _ = inner.events.send(SocketEvent::Disconnected { reason });
        } else {
            debug!(%url, %reason, attempts, "socket attempt failed");
        }

        if attempts >= reconnect.max_attempts {
            warn!(
                %url,
                attempts,
                "socket reconnect limit reached, waiting for manual connect"
            );
            let _ = inner.events.send(SocketEvent::GaveUp { attempts });
            break;
        }

        attempts += 1;
        inner.health.set_attempts(attempts);
        info!(
            delay_ms = u64::try_from(reconnect.delay.as_millis()).unwrap_or(u64::MAX),
            attempt = attempts,
            "scheduling socket reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect.delay) => {}
        }
    }

    trace!(generation, "socket loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Handshake, then pump frames both ways until the socket drops.
async fn run_session(inner: &SocketInner, url: &Url, generation: u64) -> SessionOutcome {
    debug!(%url, "opening socket");
    inner.connecting.store(true, Ordering::Release);
    let handshake = tokio_tungstenite::connect_async(url.as_str()).await;
    inner.connecting.store(false, Ordering::Release);

    let ws_stream = match handshake {
        Ok((stream, _response)) => stream,
        Err(e) => {
            return SessionOutcome {
                opened: false,
                result: Err(Error::WebSocketConnect(e.to_string())),
            };
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    inner.set_outbound(generation, tx);

    inner.health.mark_connected();
    info!(%url, "socket connected");
    let _ = inner.events.send(SocketEvent::Connected);

    let result = loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(message) = outbound else { break Ok(()) };
                if let Err(e) = write.send(message).await {
                    break Err(Error::WebSocketConnect(e.to_string()));
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => dispatch_frame(&inner.events, &text),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        debug!(code, %reason, "socket close frame received");
                        break Err(Error::WebSocketClosed { code, reason });
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong reply itself
                        trace!("socket ping");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(Error::WebSocketConnect(e.to_string())),
                    None => break Ok(()),
                }
            }
        }
    };

    SessionOutcome {
        opened: true,
        result,
    }
}

// ── Frame dispatch ───────────────────────────────────────────────────

fn dispatch_frame(events: &broadcast::Sender<SocketEvent>, text: &str) {
    match parse_frame(text) {
        Ok(InboundFrame::Telemetry(payload)) => {
            let _ = events.send(SocketEvent::Telemetry(payload));
        }
        Ok(InboundFrame::Detection(alert)) => {
            let _ = events.send(SocketEvent::Detection(alert));
        }
        Ok(InboundFrame::Unrecognized(frame_type)) => {
            debug!(%frame_type, "ignoring unrecognized socket frame");
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed socket frame");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
