// ── Local channel ──
//
// Direct connection to the two on-device controllers: the camera board is
// polled over HTTP, the actuator board holds a WebSocket. Both feed the same
// `TelemetryCache`; the layer is fully connected only when both are up.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scarelink_api::{
    CameraControl, DeviceProbe, SocketChannel, SocketCommand, SocketEvent, StatusClient,
    TransportConfig,
};

use super::poll::{PollSink, poll_loop};
use super::{Link, LinkEvent, LocalHealth, LocalTransport};
use crate::config::ConnectionConfig;
use crate::convert::snapshot_from_payload;
use crate::error::CoreError;
use crate::model::{DetectionAlert, TelemetrySource};
use crate::store::TelemetryCache;

const LINK_EVENT_CAPACITY: usize = 64;

/// Poll + socket connection to the device.
///
/// Cheaply cloneable; all clones drive the same sub-channels.
#[derive(Clone)]
pub struct LocalChannel {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    config: ArcSwap<ConnectionConfig>,
    http: reqwest::Client,
    probe: DeviceProbe,
    socket: SocketChannel,
    cache: TelemetryCache,
    events: broadcast::Sender<LinkEvent>,
    poll: Arc<PollSink>,
    /// Cancels the running poll loop.
    poll_task: Mutex<Option<CancellationToken>>,
    /// Set once the socket-event forwarder is running.
    forwarder: Mutex<Option<CancellationToken>>,
    cancel: CancellationToken,
}

impl LocalChannel {
    pub fn new(config: Arc<ConnectionConfig>, cache: TelemetryCache) -> Result<Self, CoreError> {
        let transport = TransportConfig::local(config.connect_timeout);
        let http = transport.build_client()?;
        let probe = DeviceProbe::with_client(http.clone());
        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(LocalInner {
                config: ArcSwap::new(config),
                http,
                probe,
                socket: SocketChannel::new(),
                poll: Arc::new(PollSink::new(events.clone(), cache.clone())),
                cache,
                events,
                poll_task: Mutex::new(None),
                forwarder: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> Arc<ConnectionConfig> {
        self.inner.config.load_full()
    }

    // ── Poll sub-channel ─────────────────────────────────────────────

    /// Start polling the status endpoint at the configured interval,
    /// restarting the loop if one is already running.
    pub fn start_polling(&self) {
        let config = self.inner.config.load();
        let client = StatusClient::with_client(
            self.inner.http.clone(),
            config.status_address.clone(),
        );
        let token = self.inner.cancel.child_token();

        if let Some(previous) = self.lock_poll().replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(poll_loop(
            client,
            config.poll_interval,
            config.poll_failure_threshold,
            Arc::clone(&self.inner.poll),
            token,
        ));
    }

    pub fn stop_polling(&self) {
        if let Some(token) = self.lock_poll().take() {
            token.cancel();
            self.inner.poll.stopped();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.lock_poll().is_some()
    }

    // ── Socket sub-channel ───────────────────────────────────────────

    /// The underlying socket, for callers that want raw events.
    pub fn socket(&self) -> &SocketChannel {
        &self.inner.socket
    }

    /// Relay socket events into link events, the cache and the alert feed.
    /// Idempotent.
    fn ensure_forwarder(&self) {
        let mut guard = self
            .inner
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        let token = self.inner.cancel.child_token();
        *guard = Some(token.clone());

        let rx = self.inner.socket.subscribe();
        let events = self.inner.events.clone();
        let cache = self.inner.cache.clone();
        tokio::spawn(forward_socket_events(rx, events, cache, token));
    }

    fn lock_poll(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop every background task for good.
    pub fn shutdown(&self) {
        self.stop_polling();
        self.inner.socket.shutdown();
        self.inner.cancel.cancel();
    }
}

#[async_trait]
impl LocalTransport for LocalChannel {
    async fn probe(&self) -> bool {
        let config = self.inner.config.load_full();
        let ok = self
            .inner
            .probe
            .probe(&config.status_address, config.probe_timeout)
            .await;
        debug!(address = %config.status_address, reachable = ok, "local probe");
        ok
    }

    async fn connect(&self) -> bool {
        let config = self.inner.config.load_full();
        self.ensure_forwarder();

        if self.inner.socket.is_open() {
            if !self.is_polling() {
                self.start_polling();
            }
            return true;
        }

        let mut events = self.inner.socket.subscribe();
        self.start_polling();

        match self.inner.socket.connect(&config.socket_address, config.reconnect()) {
            Ok(true) => {}
            Ok(false) => debug!("socket handshake already in flight"),
            Err(e) => {
                warn!(address = %config.socket_address, error = %e, "invalid socket address");
                return false;
            }
        }

        loop {
            match events.recv().await {
                Ok(SocketEvent::Connected) => {
                    info!(address = %config.socket_address, "local channel connected");
                    return true;
                }
                Ok(SocketEvent::GaveUp { .. }) | Err(RecvError::Closed) => return false,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    }

    async fn disconnect(&self) {
        self.stop_polling();
        self.inner.socket.disconnect();
        debug!("local channel disconnected");
    }

    fn send(&self, command: &SocketCommand) -> bool {
        self.inner.socket.send(command)
    }

    async fn camera_control(&self, control: CameraControl) -> bool {
        let config = self.inner.config.load();
        let client = StatusClient::with_client(
            self.inner.http.clone(),
            config.status_address.clone(),
        );
        match client.control(control).await {
            Ok(()) => true,
            Err(e) => {
                warn!(var = %control.var, error = %e, "camera control failed");
                false
            }
        }
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    fn health(&self) -> LocalHealth {
        LocalHealth {
            poll: self.inner.poll.health.current(),
            socket: self.inner.socket.health(),
        }
    }

    fn apply_config(&self, config: Arc<ConnectionConfig>) {
        self.inner.config.store(config);
    }
}

// ── Socket event forwarding ──────────────────────────────────────────

async fn forward_socket_events(
    mut rx: broadcast::Receiver<SocketEvent>,
    events: broadcast::Sender<LinkEvent>,
    cache: TelemetryCache,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(SocketEvent::Connected) => {
                let _ = events.send(LinkEvent::Up(Link::Socket));
            }
            Ok(SocketEvent::Disconnected { reason }) => {
                let _ = events.send(LinkEvent::Down {
                    link: Link::Socket,
                    reason,
                });
            }
            Ok(SocketEvent::GaveUp { attempts }) => {
                let _ = events.send(LinkEvent::GaveUp {
                    link: Link::Socket,
                    attempts,
                });
            }
            Ok(SocketEvent::Telemetry(payload)) => {
                match snapshot_from_payload(payload, TelemetrySource::Socket) {
                    Ok(snapshot) => cache.update(snapshot),
                    Err(e) => warn!(error = %e, "dropping invalid socket telemetry"),
                }
            }
            Ok(SocketEvent::Detection(payload)) => {
                let alert = DetectionAlert::from(payload);
                info!(label = %alert.label, count = alert.count, "detection alert");
                cache.publish_alert(alert);
            }
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "socket event consumer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
