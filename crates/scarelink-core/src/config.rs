// ── Runtime connection configuration ──
//
// Describes where the device lives and how hard to try reaching it. Built by
// the CLI (or any embedder) and handed in; core never reads config files.
// Swapped at runtime through `ConnectionManager::apply_config`.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use scarelink_api::{DeviceAddress, ReconnectConfig, TlsMode};

/// Address the device's access point hands itself when unconfigured.
pub const DEFAULT_DEVICE_HOST: &str = "192.168.4.1";

/// Cloud relay coordinates for one device.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Relay root, e.g. `https://scarecrow-prod.example-rtdb.app`.
    pub base_url: Url,
    /// Key under `devices/`.
    pub device_id: String,
    /// Optional relay secret or ID token.
    pub token: Option<SecretString>,
    pub tls: TlsMode,
}

impl CloudConfig {
    pub fn new(base_url: Url, device_id: impl Into<String>) -> Self {
        Self {
            base_url,
            device_id: device_id.into(),
            token: None,
            tls: TlsMode::System,
        }
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }
}

/// Everything the connectivity layer needs to know.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Camera board status endpoint.
    pub status_address: DeviceAddress,
    /// Actuator board WebSocket endpoint.
    pub socket_address: DeviceAddress,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    /// Bound on a local connect attempt during arbitration.
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Consecutive non-reachability poll failures before the poll link is
    /// declared down.
    pub poll_failure_threshold: u32,
    /// Presence heartbeats older than this mean offline.
    pub presence_staleness: Duration,
    /// `None` disables the remote mode entirely.
    pub cloud: Option<CloudConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::for_host(DEFAULT_DEVICE_HOST)
    }
}

impl ConnectionConfig {
    /// Defaults for a device whose boards share one host.
    pub fn for_host(host: &str) -> Self {
        Self {
            status_address: DeviceAddress::new(host, 80, "/status"),
            socket_address: DeviceAddress::new(host, 81, "/ws"),
            poll_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            poll_failure_threshold: 3,
            presence_staleness: Duration::from_secs(30),
            cloud: None,
        }
    }

    pub fn with_cloud(mut self, cloud: CloudConfig) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Reconnect policy for the socket sub-channel.
    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            delay: self.reconnect_interval,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}
