// ── Transport channels ──
//
// The two ways of reaching the device, each behind a trait so the manager
// and router can be driven by fakes. `LocalChannel` and `CloudChannel` are
// the production implementations.

pub mod cloud;
pub mod local;
mod poll;

#[cfg(test)]
pub(crate) mod fakes;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use strum::Display;
use tokio::sync::broadcast;

use scarelink_api::{CameraControl, ChannelHealth, SocketCommand};

use crate::config::ConnectionConfig;

pub use cloud::CloudChannel;
pub use local::LocalChannel;

// ── Link events ──────────────────────────────────────────────────────

/// A sub-channel whose connectivity is reported as [`LinkEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Link {
    /// Camera board HTTP status poll.
    Poll,
    /// Actuator board WebSocket.
    Socket,
    /// Live telemetry subscription on the cloud relay.
    Relay,
}

/// Connectivity change on a sub-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Up(Link),
    Down { link: Link, reason: String },
    /// Automatic reconnection stopped after `attempts` tries.
    GaveUp { link: Link, attempts: u32 },
}

/// Health of both local sub-channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalHealth {
    pub poll: ChannelHealth,
    pub socket: ChannelHealth,
}

impl LocalHealth {
    /// Both sub-channels up.
    pub fn is_fully_connected(&self) -> bool {
        self.poll.connected && self.socket.connected
    }

    /// Exactly one sub-channel up.
    pub fn is_partial(&self) -> bool {
        self.poll.connected != self.socket.connected
    }
}

// ── Transport seams ──────────────────────────────────────────────────

/// Direct connection to the on-device controllers.
#[async_trait]
pub trait LocalTransport: Send + Sync {
    /// Bounded-time reachability check of the configured status endpoint.
    async fn probe(&self) -> bool;

    /// Start polling and open the socket; `true` once the socket is open.
    async fn connect(&self) -> bool;

    /// Stop polling, close the socket, cancel pending reconnects.
    async fn disconnect(&self);

    /// Write one command frame to the socket if it is open.
    fn send(&self, command: &SocketCommand) -> bool;

    /// Apply one camera setting over HTTP.
    async fn camera_control(&self, control: CameraControl) -> bool;

    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;

    fn health(&self) -> LocalHealth;

    /// Replace the configuration; takes effect on the next connect.
    fn apply_config(&self, config: Arc<ConnectionConfig>);
}

/// Relay through the cloud document store.
#[async_trait]
pub trait CloudTransport: Send + Sync {
    /// Build the relay client and verify it with a test read.
    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    /// Queue a command document. No retry.
    async fn send_command(&self, action: &str, params: Map<String, Value>) -> bool;

    /// `false` once the relay feed has given up resubscribing.
    fn is_connected(&self) -> bool;

    /// `Relay` link changes of the telemetry feed.
    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;

    fn apply_config(&self, config: Arc<ConnectionConfig>);
}
