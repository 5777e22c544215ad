// ── Connection manager ──
//
// Arbitrates between the local and cloud channels. Local is always tried
// first; the cloud relay is the fallback. Transitions are serialized by an
// in-flight flag: a second `initialize()` while one is running returns the
// current mode without touching either channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{
    CloudChannel, CloudTransport, Link, LinkEvent, LocalChannel, LocalHealth, LocalTransport,
};
use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::model::{ConnectionEvent, ConnectionMode, ManagerState};
use crate::router::CommandRouter;
use crate::store::TelemetryCache;

const EVENT_CHANNEL_SIZE: usize = 32;

// ── Transition guard ─────────────────────────────────────────────────

/// Holds the in-flight flag for the duration of one transition.
struct TransitionGuard<'a>(&'a AtomicBool);

impl<'a> TransitionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── ConnectionManager ────────────────────────────────────────────────

/// The entry point for consumers.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Owns the mode, publishes
/// `ConnectionEvent`s, and hands out a `CommandRouter` bound to whichever
/// channel is live.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ArcSwap<ConnectionConfig>,
    local: Arc<dyn LocalTransport>,
    cloud: Arc<dyn CloudTransport>,
    cache: TelemetryCache,
    state: watch::Sender<ManagerState>,
    mode: watch::Sender<ConnectionMode>,
    events: broadcast::Sender<ConnectionEvent>,
    /// Set while a transition is running.
    transitioning: AtomicBool,
    /// Bumped by `disconnect()`; an arbitration that started under an older
    /// epoch does not commit its result.
    epoch: AtomicU64,
    /// Last `connected` value announced for the live channel.
    announced: Arc<AtomicBool>,
    /// Link-event watcher, started on first use.
    watcher: Mutex<Option<CancellationToken>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Build a manager over the given transports. Does NOT connect; call
    /// [`initialize()`](Self::initialize).
    pub fn new(
        config: Arc<ConnectionConfig>,
        local: Arc<dyn LocalTransport>,
        cloud: Arc<dyn CloudTransport>,
        cache: TelemetryCache,
    ) -> Self {
        let (state, _) = watch::channel(ManagerState::Idle);
        let (mode, _) = watch::channel(ConnectionMode::None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ManagerInner {
                config: ArcSwap::new(config),
                local,
                cloud,
                cache,
                state,
                mode,
                events,
                transitioning: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                announced: Arc::new(AtomicBool::new(false)),
                watcher: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Build a manager over the production channels.
    pub fn from_config(config: ConnectionConfig) -> Result<Self, CoreError> {
        let config = Arc::new(config);
        let cache = TelemetryCache::new();
        let local = LocalChannel::new(Arc::clone(&config), cache.clone())?;
        let cloud = CloudChannel::new(Arc::clone(&config), cache.clone());
        Ok(Self::new(config, Arc::new(local), Arc::new(cloud), cache))
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn mode(&self) -> ConnectionMode {
        *self.inner.mode.borrow()
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    pub fn watch_mode(&self) -> watch::Receiver<ConnectionMode> {
        self.inner.mode.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.subscribe()
    }

    /// Connection events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn cache(&self) -> &TelemetryCache {
        &self.inner.cache
    }

    pub fn config(&self) -> Arc<ConnectionConfig> {
        self.inner.config.load_full()
    }

    pub fn local_health(&self) -> LocalHealth {
        self.inner.local.health()
    }

    pub fn cloud_connected(&self) -> bool {
        self.inner.cloud.is_connected()
    }

    /// A router that follows this manager's mode.
    pub fn router(&self) -> CommandRouter {
        CommandRouter::new(
            self.inner.mode.subscribe(),
            Arc::clone(&self.inner.local),
            Arc::clone(&self.inner.cloud),
            self.inner.cache.clone(),
        )
    }

    /// Replace the configuration on the manager and both channels. Takes
    /// effect on the next connect or reconnect.
    pub fn apply_config(&self, config: ConnectionConfig) {
        let config = Arc::new(config);
        self.inner.config.store(Arc::clone(&config));
        self.inner.local.apply_config(Arc::clone(&config));
        self.inner.cloud.apply_config(config);
        debug!("configuration replaced");
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Pick a channel: local if the device answers and the socket opens in
    /// time, otherwise the cloud relay, otherwise none.
    pub async fn initialize(&self) -> ConnectionMode {
        let Some(_guard) = TransitionGuard::acquire(&self.inner.transitioning) else {
            debug!("initialize already in progress");
            return self.mode();
        };
        self.arbitrate().await
    }

    /// Tear both channels down and arbitrate again.
    pub async fn reconnect(&self) -> ConnectionMode {
        let Some(_guard) = TransitionGuard::acquire(&self.inner.transitioning) else {
            debug!("transition in progress, reconnect ignored");
            return self.mode();
        };
        info!(from = %self.mode(), "reconnecting");
        self.set_state(ManagerState::ConnectingLocal);
        self.inner.local.disconnect().await;
        self.inner.cache.clear();
        self.inner.cloud.disconnect().await;
        self.arbitrate().await
    }

    /// Leave local mode for the cloud relay.
    pub async fn switch_to_remote(&self) -> ConnectionMode {
        let Some(_guard) = TransitionGuard::acquire(&self.inner.transitioning) else {
            return self.mode();
        };
        let epoch = self.epoch();
        self.set_state(ManagerState::ConnectingRemote);
        self.inner.local.disconnect().await;
        self.inner.cache.clear();
        self.connect_remote(epoch).await
    }

    /// Try to move to local mode. On failure the current mode is kept.
    pub async fn switch_to_local(&self) -> bool {
        let Some(_guard) = TransitionGuard::acquire(&self.inner.transitioning) else {
            return false;
        };
        let epoch = self.epoch();
        self.ensure_watcher();

        if !self.connect_local().await {
            info!(mode = %self.mode(), "local device unavailable, keeping current mode");
            return false;
        }
        if self.is_stale(epoch) {
            self.inner.local.disconnect().await;
            return false;
        }
        self.inner.cloud.disconnect().await;
        self.commit(ManagerState::Local);
        true
    }

    /// Drop both channels. Always available, even mid-transition; an
    /// in-flight arbitration will not commit afterwards.
    pub async fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.set_state(ManagerState::Disconnected);
        self.inner.local.disconnect().await;
        self.inner.cloud.disconnect().await;
        self.inner.cache.clear();
        self.commit(ManagerState::Disconnected);
        info!("disconnected");
    }

    /// Disconnect and stop background tasks for good.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.inner.cancel.cancel();
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn arbitrate(&self) -> ConnectionMode {
        let epoch = self.epoch();
        self.ensure_watcher();

        self.set_state(ManagerState::ConnectingLocal);
        if self.connect_local().await {
            if self.is_stale(epoch) {
                self.inner.local.disconnect().await;
                return self.mode();
            }
            return self.commit(ManagerState::Local);
        }

        if self.is_stale(epoch) {
            return self.mode();
        }
        self.connect_remote(epoch).await
    }

    /// Probe, then connect within the configured timeout. Tears the local
    /// channel down again on any failure.
    async fn connect_local(&self) -> bool {
        let config = self.inner.config.load_full();

        if !self.inner.local.probe().await {
            info!(address = %config.status_address, "device not reachable locally");
            return false;
        }

        match tokio::time::timeout(config.connect_timeout, self.inner.local.connect()).await {
            Ok(true) => return true,
            Ok(false) => warn!("local connect failed"),
            Err(_) => warn!(
                timeout_ms = u64::try_from(config.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                "local connect timed out"
            ),
        }
        self.inner.local.disconnect().await;
        false
    }

    async fn connect_remote(&self, epoch: u64) -> ConnectionMode {
        self.set_state(ManagerState::ConnectingRemote);

        if !self.inner.cloud.connect().await {
            if self.is_stale(epoch) {
                return self.mode();
            }
            warn!("cloud relay unavailable");
            return self.commit(ManagerState::Disconnected);
        }
        if self.is_stale(epoch) {
            self.inner.cloud.disconnect().await;
            return self.mode();
        }
        self.commit(ManagerState::Remote)
    }

    /// Enter a settled state and announce it.
    fn commit(&self, state: ManagerState) -> ConnectionMode {
        let mode = state.mode();
        self.set_state(state);
        self.inner.mode.send_replace(mode);

        let event = ConnectionEvent::new(mode, mode != ConnectionMode::None);
        self.inner.announced.store(event.connected, Ordering::Release);
        info!(%mode, connected = event.connected, "connection mode");
        let _ = self.inner.events.send(event);
        mode
    }

    fn set_state(&self, state: ManagerState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "manager state");
        }
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.epoch() != epoch
    }

    /// Start the link-event watcher once.
    fn ensure_watcher(&self) {
        let mut guard = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        let token = self.inner.cancel.child_token();
        *guard = Some(token.clone());

        tokio::spawn(watch_links(
            LinkWatch {
                local: Arc::clone(&self.inner.local),
                state: self.inner.state.subscribe(),
                events: self.inner.events.clone(),
                announced: Arc::clone(&self.inner.announced),
            },
            self.inner.local.link_events(),
            self.inner.cloud.link_events(),
            token,
        ));
    }
}

// ── Link watcher ─────────────────────────────────────────────────────

struct LinkWatch {
    local: Arc<dyn LocalTransport>,
    state: watch::Receiver<ManagerState>,
    events: broadcast::Sender<ConnectionEvent>,
    announced: Arc<AtomicBool>,
}

impl LinkWatch {
    fn announce(&self, mode: ConnectionMode, connected: bool) {
        self.announced.store(connected, Ordering::Release);
        let _ = self.events.send(ConnectionEvent::new(mode, connected));
    }

    fn handle(&self, event: LinkEvent) {
        let state = *self.state.borrow();
        match event {
            LinkEvent::GaveUp { link, attempts } => {
                let live = matches!(
                    (link, state),
                    (Link::Socket, ManagerState::Local) | (Link::Relay, ManagerState::Remote)
                );
                if live {
                    warn!(%link, attempts, "link gave up reconnecting");
                    self.announce(state.mode(), false);
                }
            }
            LinkEvent::Up(link) | LinkEvent::Down { link, .. }
                if link != Link::Relay && state == ManagerState::Local =>
            {
                let health = self.local.health();
                let full = health.is_fully_connected();
                let announced = self.announced.load(Ordering::Acquire);
                // Up can only restore, Down can only degrade.
                let changed = match event {
                    LinkEvent::Up(_) => full && !announced,
                    _ => !full && announced,
                };
                if changed {
                    if health.is_partial() {
                        info!(
                            poll = health.poll.connected,
                            socket = health.socket.connected,
                            "local connectivity is partial"
                        );
                    }
                    self.announce(ConnectionMode::Local, full);
                } else {
                    debug!(?event, "local link change");
                }
            }
            event => debug!(?event, %state, "link change"),
        }
    }
}

/// Announce link changes on the live channel without changing the mode.
/// In Local mode a poll or socket change announces `{Local, connected}`
/// where `connected` means both sub-channels are up; a socket or relay that
/// gave up reconnecting announces `{mode, false}`. `reconnect()` or a mode
/// switch is up to the caller.
async fn watch_links(
    watch: LinkWatch,
    mut local: broadcast::Receiver<LinkEvent>,
    mut relay: broadcast::Receiver<LinkEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = local.recv() => event,
            event = relay.recv() => event,
        };

        match event {
            Ok(event) => watch.handle(event),
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "link event consumer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
