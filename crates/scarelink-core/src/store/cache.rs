use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::model::{DetectionAlert, TelemetrySnapshot};
use crate::stream::{Subscription, TelemetryStream};

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Last-known device snapshot plus the detection alert feed.
///
/// Single writer per update, any number of readers. Cheaply cloneable; all
/// clones share the same slot.
#[derive(Clone)]
pub struct TelemetryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    snapshot: watch::Sender<Option<Arc<TelemetrySnapshot>>>,
    alerts: broadcast::Sender<DetectionAlert>,
}

impl Default for TelemetryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCache {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(None);
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CacheInner { snapshot, alerts }),
        }
    }

    /// Replace the cached snapshot and notify subscribers.
    pub fn update(&self, snapshot: TelemetrySnapshot) {
        trace!(source = %snapshot.source, "telemetry snapshot replaced");
        self.inner.snapshot.send_replace(Some(Arc::new(snapshot)));
    }

    pub fn current(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.inner.snapshot.borrow().clone()
    }

    /// Forget the cached snapshot. The manager calls this whenever it tears
    /// the local channel down.
    pub fn clear(&self) {
        self.inner.snapshot.send_replace(None);
    }

    pub fn subscribe(&self) -> TelemetryStream {
        TelemetryStream::new(self.inner.snapshot.subscribe())
    }

    /// Invoke `callback` with every new snapshot until the returned
    /// [`Subscription`] is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<TelemetrySnapshot>) + Send + Sync + 'static,
    {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let mut stream = self.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    snap = stream.changed() => match snap {
                        Some(snap) => callback(snap),
                        None => break,
                    },
                }
            }
        });

        Subscription::new(token)
    }

    // ── Alerts ───────────────────────────────────────────────────────

    pub fn publish_alert(&self, alert: DetectionAlert) {
        let _ = self.inner.alerts.send(alert);
    }

    pub fn alerts(&self) -> broadcast::Receiver<DetectionAlert> {
        self.inner.alerts.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::TelemetrySource;

    fn snapshot(soil: f64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            soil_humidity: Some(soil),
            ..TelemetrySnapshot::empty(TelemetrySource::Poll)
        }
    }

    #[tokio::test]
    async fn update_replaces_whole_snapshot() {
        let cache = TelemetryCache::new();
        assert!(cache.current().is_none());

        cache.update(TelemetrySnapshot {
            motion: Some(true),
            ..snapshot(10.0)
        });
        cache.update(snapshot(20.0));

        let current = cache.current().unwrap();
        assert_eq!(current.soil_humidity, Some(20.0));
        assert_eq!(current.motion, None);
    }

    #[tokio::test]
    async fn stream_sees_updates() {
        let cache = TelemetryCache::new();
        let mut stream = cache.subscribe();

        cache.update(snapshot(33.0));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.soil_humidity, Some(33.0));
        assert_eq!(stream.current().unwrap().soil_humidity, Some(33.0));
    }

    #[tokio::test]
    async fn dropped_subscription_stops_callbacks() {
        let cache = TelemetryCache::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let sub = cache.on_update(move |snap| {
            let _ = tx.send(snap.soil_humidity);
        });

        cache.update(snapshot(1.0));
        assert_eq!(rx.recv().await, Some(Some(1.0)));

        sub.unsubscribe();
        cache.update(snapshot(2.0));
        let next = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
        assert!(!matches!(next, Ok(Some(_))), "callback fired after unsubscribe");
    }
}
