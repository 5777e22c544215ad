use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::model::TelemetrySnapshot;
use crate::store::TelemetryCache;
use crate::stream::Subscription;

/// Roughly four minutes at the default 2 s poll interval.
pub const DEFAULT_HISTORY_CAPACITY: usize = 120;

/// Bounded trail of recent snapshots, oldest first.
pub struct TelemetryHistory {
    entries: Arc<Mutex<VecDeque<Arc<TelemetrySnapshot>>>>,
    capacity: usize,
    _feed: Option<Subscription>,
}

impl TelemetryHistory {
    /// A detached history; fill it with [`push`](Self::push).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            _feed: None,
        }
    }

    /// A history that records every cache update until dropped.
    pub fn attach(cache: &TelemetryCache, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let entries = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let sink = Arc::clone(&entries);
        let feed = cache.on_update(move |snap| push_bounded(&sink, capacity, snap));
        Self {
            entries,
            capacity,
            _feed: Some(feed),
        }
    }

    pub fn push(&self, snapshot: Arc<TelemetrySnapshot>) {
        push_bounded(&self.entries, self.capacity, snapshot);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All retained snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<Arc<TelemetrySnapshot>> {
        self.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.lock().back().cloned()
    }

    /// Time series of one reading, skipping snapshots where it was unknown.
    pub fn series<F>(&self, field: F) -> Vec<(DateTime<Utc>, f64)>
    where
        F: Fn(&TelemetrySnapshot) -> Option<f64>,
    {
        self.lock()
            .iter()
            .filter_map(|s| field(s).map(|v| (s.received_at, v)))
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<TelemetrySnapshot>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_bounded(
    entries: &Mutex<VecDeque<Arc<TelemetrySnapshot>>>,
    capacity: usize,
    snapshot: Arc<TelemetrySnapshot>,
) {
    let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
    while entries.len() >= capacity {
        entries.pop_front();
    }
    entries.push_back(snapshot);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::TelemetrySource;

    fn snapshot(soil: Option<f64>) -> Arc<TelemetrySnapshot> {
        Arc::new(TelemetrySnapshot {
            soil_humidity: soil,
            ..TelemetrySnapshot::empty(TelemetrySource::Socket)
        })
    }

    #[test]
    fn drops_oldest_beyond_capacity() {
        let history = TelemetryHistory::new(3);
        for v in 0..5 {
            history.push(snapshot(Some(f64::from(v))));
        }

        assert_eq!(history.len(), 3);
        let soil: Vec<_> = history
            .snapshots()
            .iter()
            .map(|s| s.soil_humidity.unwrap())
            .collect();
        assert_eq!(soil, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn series_skips_unknown_readings() {
        let history = TelemetryHistory::new(10);
        history.push(snapshot(Some(40.0)));
        history.push(snapshot(None));
        history.push(snapshot(Some(42.0)));

        let series = history.series(|s| s.soil_humidity);
        let values: Vec<f64> = series.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![40.0, 42.0]);
    }

    #[tokio::test]
    async fn attached_history_follows_cache() {
        let cache = TelemetryCache::new();
        let history = TelemetryHistory::attach(&cache, DEFAULT_HISTORY_CAPACITY);
        let mut stream = cache.subscribe();

        cache.update((*snapshot(Some(12.0))).clone());
        stream.changed().await.unwrap();
        // Give the history task a turn to record it.
        for _ in 0..10 {
            if !history.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(history.latest().unwrap().soil_humidity, Some(12.0));
    }
}
