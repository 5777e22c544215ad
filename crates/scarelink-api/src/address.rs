// ── Device addressing ──
//
// A device endpoint is a host, a port, and a path. The same triple is used
// for the camera board's HTTP status path and the actuator board's
// WebSocket path; only the URL scheme differs.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Network location of one on-device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".into()
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            host: host.into(),
            port,
            path,
        }
    }

    /// Same host and port, different path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self::new(self.host.clone(), self.port, path)
    }

    /// `http://host:port` with no path.
    pub fn http_base(&self) -> Result<Url, Error> {
        Ok(Url::parse(&format!("http://{}:{}", self.host, self.port))?)
    }

    /// `http://host:port/path`.
    pub fn http_url(&self) -> Result<Url, Error> {
        Ok(self.http_base()?.join(&self.path)?)
    }

    /// `ws://host:port/path`.
    pub fn ws_url(&self) -> Result<Url, Error> {
        Ok(Url::parse(&format!(
            "ws://{}:{}{}",
            self.host, self.port, self.path
        ))?)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}
