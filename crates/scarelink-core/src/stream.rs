// ── Reactive telemetry streams ──
//
// Subscription types for consuming snapshot changes from the
// `TelemetryCache`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::model::TelemetrySnapshot;

type Slot = Option<Arc<TelemetrySnapshot>>;

/// A subscription to the snapshot cache.
///
/// Provides point-in-time access and change notification via `changed()`
/// or by converting to a `Stream`.
pub struct TelemetryStream {
    current: Slot,
    receiver: watch::Receiver<Slot>,
}

impl TelemetryStream {
    pub(crate) fn new(receiver: watch::Receiver<Slot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> Option<&Arc<TelemetrySnapshot>> {
        self.current.as_ref()
    }

    /// The latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Slot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot. Returns `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<Arc<TelemetrySnapshot>> {
        loop {
            self.receiver.changed().await.ok()?;
            let snap = self.receiver.borrow_and_update().clone();
            self.current.clone_from(&snap);
            // A cleared cache is not an update worth waking for.
            if snap.is_some() {
                return snap;
            }
        }
    }

    /// Convert into a `Stream` that yields each new snapshot.
    pub fn into_stream(self) -> TelemetryWatchStream {
        TelemetryWatchStream {
            inner: WatchStream::from_changes(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct TelemetryWatchStream {
    inner: WatchStream<Slot>,
}

impl Stream for TelemetryWatchStream {
    type Item = Arc<TelemetrySnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Some(snap))) => return Poll::Ready(Some(snap)),
                Poll::Ready(Some(None)) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ── Subscription handle ──────────────────────────────────────────────

/// Handle returned by every callback-style subscribe call.
///
/// The background delivery task stops on `unsubscribe()` or when the
/// handle is dropped.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    token: CancellationToken,
    _guard: DropGuard,
}

impl Subscription {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    /// Whether delivery is still running.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
