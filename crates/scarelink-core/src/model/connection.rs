// ── Connection mode and lifecycle ──

use serde::Serialize;
use strum::{Display, EnumString};

/// Which transport is authoritative. Exactly one at any time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConnectionMode {
    /// Direct to the on-device controllers.
    Local,
    /// Through the cloud relay.
    Remote,
    #[default]
    None,
}

/// Arbitration state of the `ConnectionManager`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ManagerState {
    #[default]
    Idle,
    ConnectingLocal,
    ConnectingRemote,
    Local,
    Remote,
    Disconnected,
}

impl ManagerState {
    /// The mode this state implies.
    pub fn mode(self) -> ConnectionMode {
        match self {
            Self::Local => ConnectionMode::Local,
            Self::Remote => ConnectionMode::Remote,
            Self::Idle | Self::ConnectingLocal | Self::ConnectingRemote | Self::Disconnected => {
                ConnectionMode::None
            }
        }
    }

    pub fn is_connecting(self) -> bool {
        matches!(self, Self::ConnectingLocal | Self::ConnectingRemote)
    }
}

/// Published on every arbitration outcome and on loss of the live link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub mode: ConnectionMode,
    pub connected: bool,
}

impl ConnectionEvent {
    pub fn new(mode: ConnectionMode, connected: bool) -> Self {
        Self { mode, connected }
    }
}
