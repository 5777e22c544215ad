// ── Per-channel health ──
//
// One `ChannelHealth` value per sub-channel, published through a `watch`
// channel so readers always see the latest state without locking.

use serde::Serialize;
use tokio::sync::watch;

/// Connectivity and retry state of a single channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelHealth {
    pub connected: bool,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
}

/// Single-writer holder for a channel's [`ChannelHealth`].
#[derive(Debug)]
pub struct HealthTracker {
    tx: watch::Sender<ChannelHealth>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ChannelHealth::default());
        Self { tx }
    }

    pub fn current(&self) -> ChannelHealth {
        self.tx.borrow().clone()
    }

    /// Mark connected and reset the attempt counter. Returns `true` if this
    /// was a disconnected → connected transition.
    pub fn mark_connected(&self) -> bool {
        let mut transitioned = false;
        self.tx.send_modify(|h| {
            transitioned = !h.connected;
            h.connected = true;
            h.last_error = None;
            h.reconnect_attempts = 0;
        });
        transitioned
    }

    /// Mark disconnected. Returns `true` on a connected → disconnected
    /// transition.
    pub fn mark_disconnected(&self, error: Option<String>) -> bool {
        let mut transitioned = false;
        self.tx.send_modify(|h| {
            transitioned = h.connected;
            h.connected = false;
            if error.is_some() {
                h.last_error = error;
            }
        });
        transitioned
    }

    /// Record an error without changing connectivity.
    pub fn record_error(&self, error: String) {
        self.tx.send_modify(|h| h.last_error = Some(error));
    }

    pub fn set_attempts(&self, attempts: u32) {
        self.tx.send_modify(|h| h.reconnect_attempts = attempts);
    }
}
