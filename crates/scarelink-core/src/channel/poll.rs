// ── Status poll loop ──
//
// One request immediately, then one per interval, never overlapping. A
// failure that means the board is gone (refused, timed out) drops the link
// at once; anything else (bad status, bad body) has to repeat
// `threshold` times in a row first. One success clears the streak.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scarelink_api::{HealthTracker, StatusClient};

use super::{Link, LinkEvent};
use crate::convert::snapshot_from_payload;
use crate::model::TelemetrySource;
use crate::store::TelemetryCache;

/// Consecutive-failure counter behind the poll link's debounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FailureStreak {
    threshold: u32,
    consecutive: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    pub fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Count a failure; `true` if the link should now be considered down.
    pub fn failure(&mut self, unreachable: bool) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        unreachable || self.consecutive >= self.threshold
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Where poll results go.
pub(crate) struct PollSink {
    pub health: HealthTracker,
    pub events: broadcast::Sender<LinkEvent>,
    pub cache: TelemetryCache,
}

impl PollSink {
    pub fn new(events: broadcast::Sender<LinkEvent>, cache: TelemetryCache) -> Self {
        Self {
            health: HealthTracker::new(),
            events,
            cache,
        }
    }

    fn up(&self) {
        if self.health.mark_connected() {
            info!("status poll link up");
            let _ = self.events.send(LinkEvent::Up(Link::Poll));
        }
    }

    fn failed(&self, reason: String, down: bool) {
        if !down {
            self.health.record_error(reason);
            return;
        }
        if self.health.mark_disconnected(Some(reason.clone())) {
            warn!(%reason, "status poll link down");
            let _ = self.events.send(LinkEvent::Down {
                link: Link::Poll,
                reason,
            });
        }
    }

    /// Mark the link down on request (stop, disconnect).
    pub fn stopped(&self) {
        self.failed("polling stopped".into(), true);
    }
}

pub(crate) async fn poll_loop(
    client: StatusClient,
    interval: Duration,
    threshold: u32,
    sink: Arc<PollSink>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut streak = FailureStreak::new(threshold);

    debug!(address = %client.address(), ?interval, "status polling started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = client.fetch_status() => result,
        };

        let outcome = result
            .map_err(|e| (e.is_unreachable(), e.to_string()))
            .and_then(|payload| {
                snapshot_from_payload(payload, TelemetrySource::Poll)
                    .map_err(|e| (false, e.to_string()))
            });

        match outcome {
            Ok(snapshot) => {
                streak.success();
                sink.cache.update(snapshot);
                sink.up();
            }
            Err((unreachable, reason)) => {
                let down = streak.failure(unreachable);
                debug!(
                    %reason,
                    unreachable,
                    consecutive = streak.consecutive(),
                    "status poll failed"
                );
                sink.failed(reason, down);
            }
        }
    }

    debug!("status polling stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use scarelink_api::DeviceAddress;

    use super::*;

    #[test]
    fn streak_debounces_soft_failures() {
        let mut streak = FailureStreak::new(3);
        assert!(!streak.failure(false));
        assert!(!streak.failure(false));
        assert!(streak.failure(false));

        streak.success();
        assert!(!streak.failure(false));
    }

    #[test]
    fn unreachable_drops_immediately() {
        let mut streak = FailureStreak::new(3);
        assert!(streak.failure(true));
    }

    async fn start(server: &MockServer) -> (Arc<PollSink>, broadcast::Receiver<LinkEvent>, CancellationToken) {
        let url = Url::parse(&server.uri()).unwrap();
        let address = DeviceAddress::new(url.host_str().unwrap(), url.port().unwrap(), "/status");
        let client = StatusClient::with_client(reqwest::Client::new(), address);

        let (events, rx) = broadcast::channel(16);
        let sink = Arc::new(PollSink::new(events, TelemetryCache::new()));
        let cancel = CancellationToken::new();
        tokio::spawn(poll_loop(
            client,
            Duration::from_millis(20),
            3,
            Arc::clone(&sink),
            cancel.clone(),
        ));
        (sink, rx, cancel)
    }

    async fn next(rx: &mut broadcast::Receiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn success_updates_cache_and_raises_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"soilHumidity": 55, "motion": false})),
            )
            .mount(&server)
            .await;

        let (sink, mut rx, cancel) = start(&server).await;
        assert_eq!(next(&mut rx).await, LinkEvent::Up(Link::Poll));

        let snap = sink.cache.current().unwrap();
        assert_eq!(snap.soil_humidity, Some(55.0));
        assert_eq!(snap.motion, Some(false));
        assert!(sink.health.current().connected);
        cancel.cancel();
    }

    #[tokio::test]
    async fn repeated_bad_status_drops_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"soilHumidity": 30})))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (sink, mut rx, cancel) = start(&server).await;
        assert_eq!(next(&mut rx).await, LinkEvent::Up(Link::Poll));
        assert!(matches!(
            next(&mut rx).await,
            LinkEvent::Down { link: Link::Poll, .. }
        ));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() >= 4, "expected 1 success + 3 failures");
        assert!(sink.health.current().last_error.unwrap().contains("500"));
        // The last good snapshot stays cached.
        assert_eq!(sink.cache.current().unwrap().soil_humidity, Some(30.0));
        cancel.cancel();
    }

    #[tokio::test]
    async fn out_of_range_reading_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"volume": 7.5})))
            .mount(&server)
            .await;

        let (sink, _rx, cancel) = start(&server).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(sink.cache.current().is_none());
        assert!(!sink.health.current().connected);
        assert!(sink.health.current().last_error.is_some());
        cancel.cancel();
    }
}
