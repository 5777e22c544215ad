// ── Cloud channel ──
//
// Relay through the document store. Commands are appended to
// `devices/<id>/commands` for the device to pick up; telemetry and presence
// arrive as live subscriptions to the device's documents. A subscription that
// ends is reopened on the socket's fixed-delay policy; past the cap the relay
// link is reported as given up and the channel counts as disconnected.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scarelink_api::cloud::{DevicePaths, PendingCommand, PresenceDocument};
use scarelink_api::{
    DocumentStore, HealthTracker, ReconnectConfig, RestDocumentStore, TelemetryPayload,
    TransportConfig,
};

use super::{CloudTransport, Link, LinkEvent};
use crate::config::{CloudConfig, ConnectionConfig};
use crate::convert::snapshot_from_payload;
use crate::error::CoreError;
use crate::model::{TelemetrySnapshot, TelemetrySource};
use crate::store::TelemetryCache;
use crate::stream::Subscription;

const LINK_EVENT_CAPACITY: usize = 16;

/// Builds the relay client from the current cloud settings.
pub type StoreFactory =
    Arc<dyn Fn(&CloudConfig) -> Result<Arc<dyn DocumentStore>, scarelink_api::Error> + Send + Sync>;

/// Relay connection to the device.
#[derive(Clone)]
pub struct CloudChannel {
    inner: Arc<CloudInner>,
}

struct CloudInner {
    config: ArcSwap<ConnectionConfig>,
    factory: StoreFactory,
    store: RwLock<Option<Arc<dyn DocumentStore>>>,
    cache: TelemetryCache,
    /// Telemetry subscription feeding the cache while connected.
    feed: Mutex<Option<Subscription>>,
    connecting: AtomicBool,
    events: broadcast::Sender<LinkEvent>,
    /// Health of the relay subscriptions.
    health: HealthTracker,
}

impl CloudInner {
    /// Forget the relay client, but only if it is still `store`.
    fn release(&self, store: &Arc<dyn DocumentStore>) {
        let mut guard = self.store.write().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|current| Arc::ptr_eq(current, store)) {
            *guard = None;
        }
    }
}

/// The REST relay client, honoring the configured TLS mode.
fn rest_store(cloud: &CloudConfig) -> Result<Arc<dyn DocumentStore>, scarelink_api::Error> {
    let transport = TransportConfig {
        tls: cloud.tls.clone(),
        ..TransportConfig::default()
    };
    let store = RestDocumentStore::new(cloud.base_url.clone(), cloud.token.clone(), &transport)?;
    Ok(Arc::new(store))
}

impl CloudChannel {
    pub fn new(config: Arc<ConnectionConfig>, cache: TelemetryCache) -> Self {
        Self::with_store_factory(config, cache, Arc::new(rest_store))
    }

    /// Use a custom relay client builder.
    pub fn with_store_factory(
        config: Arc<ConnectionConfig>,
        cache: TelemetryCache,
        factory: StoreFactory,
    ) -> Self {
        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        Self {
            inner: Arc::new(CloudInner {
                config: ArcSwap::new(config),
                factory,
                store: RwLock::new(None),
                cache,
                feed: Mutex::new(None),
                connecting: AtomicBool::new(false),
                events,
                health: HealthTracker::new(),
            }),
        }
    }

    fn store(&self) -> Option<Arc<dyn DocumentStore>> {
        self.inner
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_store(&self, store: Option<Arc<dyn DocumentStore>>) {
        *self
            .inner
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner) = store;
    }

    fn set_feed(&self, feed: Option<Subscription>) {
        *self
            .inner
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = feed;
    }

    /// The configured device id, if a relay is configured at all.
    pub fn device_id(&self) -> Option<String> {
        self.inner
            .config
            .load()
            .cloud
            .as_ref()
            .map(|c| c.device_id.clone())
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Deliver a validated snapshot for every update of the device's
    /// telemetry document.
    pub fn subscribe_to_telemetry<F>(
        &self,
        device_id: &str,
        callback: F,
    ) -> Result<Subscription, CoreError>
    where
        F: Fn(TelemetrySnapshot) + Send + Sync + 'static,
    {
        let path = DevicePaths::new(device_id).telemetry();
        let docs = self.follow(path.clone())?;
        let token = CancellationToken::new();
        let cancel = token.clone();

        tokio::spawn(async move {
            let mut docs = pin!(docs);
            loop {
                let doc = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    doc = docs.next() => doc,
                };
                match doc {
                    Some(Value::Null) => {}
                    Some(doc) => match decode_telemetry(doc) {
                        Ok(snapshot) => callback(snapshot),
                        Err(reason) => warn!(%path, %reason, "dropping cloud telemetry"),
                    },
                    None => break,
                }
            }
        });

        Ok(Subscription::new(token))
    }

    /// Report device presence. `callback(true)` while the last heartbeat is
    /// younger than the configured staleness, `callback(false)` otherwise;
    /// called only when the state changes.
    pub fn subscribe_to_presence<F>(
        &self,
        device_id: &str,
        callback: F,
    ) -> Result<Subscription, CoreError>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let staleness = self.inner.config.load().presence_staleness;
        let path = DevicePaths::new(device_id).presence();
        let docs = self.follow(path.clone())?;
        let token = CancellationToken::new();
        let cancel = token.clone();

        tokio::spawn(async move {
            let mut docs = pin!(docs);
            let mut online: Option<bool> = None;
            let mut deadline: Option<Instant> = None;
            let mut notify = |state: bool| {
                if online != Some(state) {
                    online = Some(state);
                    callback(state);
                }
            };

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() =>
                    {
                        deadline = None;
                        debug!(%path, "presence heartbeat went stale");
                        notify(false);
                    }
                    doc = docs.next() => match doc {
                        Some(doc) => {
                            let remaining = serde_json::from_value::<PresenceDocument>(doc)
                                .ok()
                                .and_then(|p| {
                                    fresh_for(p.last_seen, Utc::now().timestamp_millis(), staleness)
                                });
                            deadline = remaining.map(|d| Instant::now() + d);
                            notify(remaining.is_some());
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Subscription::new(token))
    }

    /// Documents at `path` from the current relay client. Reopens the
    /// subscription whenever it ends; after `max_reconnect_attempts` failed
    /// reopens in a row it publishes `GaveUp`, drops the client and ends.
    fn follow(
        &self,
        path: String,
    ) -> Result<impl Stream<Item = Value> + Send + 'static, CoreError> {
        let store = self.store().ok_or(CoreError::NotConnected)?;
        let reconnect = self.inner.config.load().reconnect();
        Ok(follow_document(Arc::clone(&self.inner), store, path, reconnect))
    }
}

fn follow_document(
    inner: Arc<CloudInner>,
    store: Arc<dyn DocumentStore>,
    path: String,
    reconnect: ReconnectConfig,
) -> impl Stream<Item = Value> + Send + 'static {
    async_stream::stream! {
        let mut attempts: u32 = 0;

        loop {
            let reason = match store.subscribe(&path).await {
                Ok(mut docs) => {
                    attempts = 0;
                    if inner.health.mark_connected() {
                        let _ = inner.events.send(LinkEvent::Up(Link::Relay));
                    }
                    loop {
                        match docs.next().await {
                            Some(Ok(doc)) => yield doc,
                            Some(Err(e)) => break e.to_string(),
                            None => break "subscription closed".to_owned(),
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            if inner.health.mark_disconnected(Some(reason.clone())) {
                warn!(%path, %reason, "relay subscription lost");
                let _ = inner.events.send(LinkEvent::Down { link: Link::Relay, reason });
            } else {
                debug!(%path, %reason, attempts, "relay subscription attempt failed");
            }

            if attempts >= reconnect.max_attempts {
                warn!(%path, attempts, "relay resubscribe limit reached");
                inner.release(&store);
                let _ = inner.events.send(LinkEvent::GaveUp { link: Link::Relay, attempts });
                break;
            }

            attempts += 1;
            inner.health.set_attempts(attempts);
            info!(
                %path,
                delay_ms = u64::try_from(reconnect.delay.as_millis()).unwrap_or(u64::MAX),
                attempt = attempts,
                "scheduling relay resubscribe"
            );
            tokio::time::sleep(reconnect.delay).await;
        }
    }
}

#[async_trait]
impl CloudTransport for CloudChannel {
    async fn connect(&self) -> bool {
        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("cloud connect already in flight");
            return false;
        }
        let connected = self.try_connect().await;
        self.inner.connecting.store(false, Ordering::Release);
        connected
    }

    async fn disconnect(&self) {
        self.set_feed(None);
        self.set_store(None);
        self.inner.health.mark_disconnected(None);
        debug!("cloud channel disconnected");
    }

    async fn send_command(&self, action: &str, params: Map<String, Value>) -> bool {
        let (Some(store), Some(device_id)) = (self.store(), self.device_id()) else {
            debug!(action, "cloud channel not connected");
            return false;
        };

        let document = match serde_json::to_value(PendingCommand::new(action, params)) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(action, error = %e, "could not encode command document");
                return false;
            }
        };

        match store
            .append(&DevicePaths::new(device_id).commands(), document)
            .await
        {
            Ok(key) => {
                debug!(action, %key, "command queued on relay");
                true
            }
            Err(e) => {
                warn!(action, error = %e, "relay rejected command");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.store().is_some()
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    fn apply_config(&self, config: Arc<ConnectionConfig>) {
        self.inner.config.store(config);
    }
}

impl CloudChannel {
    async fn try_connect(&self) -> bool {
        let config = self.inner.config.load_full();
        let Some(cloud) = config.cloud.as_ref() else {
            debug!("no cloud relay configured");
            return false;
        };

        let store = match (self.inner.factory)(cloud) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "could not build relay client");
                return false;
            }
        };

        let paths = DevicePaths::new(&cloud.device_id);
        if let Err(e) = store.read(&paths.presence()).await {
            warn!(relay = %cloud.base_url, error = %e, "relay test read failed");
            return false;
        }

        self.set_store(Some(store));
        let cache = self.inner.cache.clone();
        match self.subscribe_to_telemetry(&cloud.device_id, move |snap| cache.update(snap)) {
            Ok(feed) => self.set_feed(Some(feed)),
            Err(e) => warn!(error = %e, "could not start telemetry feed"),
        }

        info!(relay = %cloud.base_url, device = %cloud.device_id, "cloud channel connected");
        true
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn decode_telemetry(doc: Value) -> Result<TelemetrySnapshot, String> {
    let payload: TelemetryPayload = serde_json::from_value(doc).map_err(|e| e.to_string())?;
    snapshot_from_payload(payload, TelemetrySource::Cloud).map_err(|e| e.to_string())
}

/// How much longer a heartbeat at `last_seen_ms` keeps the device online,
/// or `None` if it is already stale. Heartbeats from the future count as
/// just seen.
fn fresh_for(last_seen_ms: i64, now_ms: i64, staleness: Duration) -> Option<Duration> {
    let age = u64::try_from(now_ms.saturating_sub(last_seen_ms)).unwrap_or(0);
    let age = Duration::from_millis(age);
    staleness.checked_sub(age).filter(|d| !d.is_zero())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use url::Url;

    use scarelink_api::{DocumentStream, Error};

    use super::*;

    type Feed = mpsc::UnboundedSender<Result<Value, Error>>;

    #[derive(Default)]
    struct MemoryStore {
        fail_reads: AtomicBool,
        fail_subscribes: AtomicBool,
        subscribes: AtomicUsize,
        appended: Mutex<Vec<(String, Value)>>,
        feeds: Mutex<HashMap<String, Feed>>,
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn read(&self, _path: &str) -> Result<Option<Value>, Error> {
            if self.fail_reads.load(Ordering::SeqCst) {
                Err(Error::Unauthorized)
            } else {
                Ok(None)
            }
        }

        async fn append(&self, collection: &str, document: Value) -> Result<String, Error> {
            let mut appended = self.appended.lock().unwrap();
            appended.push((collection.to_owned(), document));
            Ok(format!("key-{}", appended.len()))
        }

        async fn subscribe(&self, path: &str) -> Result<DocumentStream, Error> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            if self.fail_subscribes.load(Ordering::SeqCst) {
                return Err(Error::StreamEnded("relay offline".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().insert(path.to_owned(), tx);
            Ok(Box::pin(UnboundedReceiverStream::new(rx)))
        }
    }

    fn channel(store: &Arc<MemoryStore>) -> (CloudChannel, TelemetryCache) {
        let config = ConnectionConfig::default().with_cloud(CloudConfig::new(
            Url::parse("https://relay.example").unwrap(),
            "crow-01",
        ));
        let cache = TelemetryCache::new();
        let shared = Arc::clone(store);
        let channel = CloudChannel::with_store_factory(
            Arc::new(config),
            cache.clone(),
            Arc::new(move |_: &CloudConfig| {
                Ok(Arc::clone(&shared) as Arc<dyn DocumentStore>)
            }),
        );
        (channel, cache)
    }

    async fn wait_for_feed(store: &MemoryStore, path: &str) -> Feed {
        for _ in 0..100 {
            if let Some(feed) = store.feeds.lock().unwrap().get(path) {
                return feed.clone();
            }
            tokio::task::yield_now().await;
        }
        panic!("no subscription to {path}");
    }

    /// Wait on the paused clock until `count` subscribe calls were made.
    async fn wait_for_subscribes(store: &MemoryStore, count: usize) {
        for _ in 0..200 {
            if store.subscribes.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("expected {count} subscribe calls");
    }

    #[tokio::test]
    async fn connect_requires_cloud_config() {
        let channel = CloudChannel::new(Arc::new(ConnectionConfig::default()), TelemetryCache::new());
        assert!(!channel.connect().await);
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn connect_fails_when_test_read_fails() {
        let store = Arc::new(MemoryStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let (channel, _) = channel(&store);

        assert!(!channel.connect().await);
        assert!(!channel.send_command("SOUND_ALARM", Map::new()).await);
        assert!(store.appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_command_appends_pending_document() {
        let store = Arc::new(MemoryStore::default());
        let (channel, _) = channel(&store);
        assert!(channel.connect().await);

        let mut params = Map::new();
        params.insert("volume".into(), json!(0.5));
        assert!(channel.send_command("SET_VOLUME", params).await);

        let appended = store.appended.lock().unwrap();
        assert_eq!(appended.len(), 1);
        let (collection, doc) = &appended[0];
        assert_eq!(collection, "devices/crow-01/commands");
        assert_eq!(doc["action"], "SET_VOLUME");
        assert_eq!(doc["params"], json!({"volume": 0.5}));
        assert_eq!(doc["status"], "pending");
        assert!(doc["created_at"].is_string());
    }

    #[tokio::test]
    async fn telemetry_document_feeds_cache() {
        let store = Arc::new(MemoryStore::default());
        let (channel, cache) = channel(&store);
        let mut snapshots = cache.subscribe();
        assert!(channel.connect().await);

        let feed = wait_for_feed(&store, "devices/crow-01/telemetry").await;
        feed.send(Ok(json!({"soilHumidity": 61, "playing": true}))).unwrap();

        let snap = snapshots.changed().await.unwrap();
        assert_eq!(snap.soil_humidity, Some(61.0));
        assert_eq!(snap.playing, Some(true));
        assert_eq!(snap.source, TelemetrySource::Cloud);

        channel.disconnect().await;
        assert!(!channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_feed_resubscribes_after_stream_error() {
        let store = Arc::new(MemoryStore::default());
        let (channel, cache) = channel(&store);
        let mut snapshots = cache.subscribe();
        assert!(channel.connect().await);

        let feed = wait_for_feed(&store, "devices/crow-01/telemetry").await;
        feed.send(Err(Error::StreamEnded("network blip".into())))
            .unwrap();

        wait_for_subscribes(&store, 2).await;
        assert!(channel.is_connected());

        let feed = wait_for_feed(&store, "devices/crow-01/telemetry").await;
        feed.send(Ok(json!({"soilHumidity": 40}))).unwrap();
        let snap = snapshots.changed().await.unwrap();
        assert_eq!(snap.soil_humidity, Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_feed_gives_up_after_cap() {
        let store = Arc::new(MemoryStore::default());
        let (channel, _) = channel(&store);
        let mut links = channel.link_events();
        assert!(channel.connect().await);

        let feed = wait_for_feed(&store, "devices/crow-01/telemetry").await;
        assert_eq!(links.recv().await.unwrap(), LinkEvent::Up(Link::Relay));

        store.fail_subscribes.store(true, Ordering::SeqCst);
        feed.send(Err(Error::StreamEnded("network blip".into())))
            .unwrap();

        assert!(matches!(
            links.recv().await.unwrap(),
            LinkEvent::Down { link: Link::Relay, .. }
        ));
        assert_eq!(
            links.recv().await.unwrap(),
            LinkEvent::GaveUp {
                link: Link::Relay,
                attempts: 5
            }
        );
        // One initial subscribe plus five failed reopens.
        assert_eq!(store.subscribes.load(Ordering::SeqCst), 6);
        assert!(!channel.is_connected());
        assert!(!channel.send_command("SOUND_ALARM", Map::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_goes_stale_on_deadline() {
        let store = Arc::new(MemoryStore::default());
        let (channel, _) = channel(&store);
        assert!(channel.connect().await);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = channel
            .subscribe_to_presence("crow-01", move |online| {
                tx.send(online).unwrap();
            })
            .unwrap();

        let feed = wait_for_feed(&store, "devices/crow-01/presence").await;
        let now = Utc::now().timestamp_millis();
        feed.send(Ok(json!({"lastSeen": now}))).unwrap();
        assert_eq!(rx.recv().await, Some(true));

        // A repeated fresh heartbeat is not a change.
        feed.send(Ok(json!({"lastSeen": now}))).unwrap();

        // Paused time auto-advances to the staleness deadline.
        let started = Instant::now();
        assert_eq!(rx.recv().await, Some(false));
        assert!(started.elapsed() >= Duration::from_secs(29));

        feed.send(Ok(json!({"lastSeen": Utc::now().timestamp_millis()})))
            .unwrap();
        assert_eq!(rx.recv().await, Some(true));
    }

    #[test]
    fn freshness_window() {
        let staleness = Duration::from_secs(30);
        assert_eq!(
            fresh_for(1_000_000, 1_010_000, staleness),
            Some(Duration::from_secs(20))
        );
        assert_eq!(fresh_for(1_000_000, 1_030_000, staleness), None);
        assert_eq!(fresh_for(1_000_000, 1_100_000, staleness), None);
        assert_eq!(fresh_for(1_010_000, 1_000_000, staleness), Some(staleness));
    }

    #[tokio::test]
    async fn subscriptions_require_connection() {
        let store = Arc::new(MemoryStore::default());
        let (channel, _) = channel(&store);
        assert!(matches!(
            channel.subscribe_to_presence("crow-01", |_| {}),
            Err(CoreError::NotConnected)
        ));
    }
}
