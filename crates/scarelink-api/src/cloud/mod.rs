// ── Cloud relay contract ──
//
// The relay is a JSON document tree with three operations: read a node,
// append a child with a generated key, and subscribe to a node's live value.
// `RestDocumentStore` speaks the REST/SSE dialect; anything else that can do
// those three things can sit behind `DocumentStore`.

mod rest;
mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

pub use rest::RestDocumentStore;
pub use sse::{SseDecoder, SseEvent};

/// Live values of one document node. Every item is the whole node after an
/// update was applied.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Value, Error>> + Send>>;

/// Minimal read/append/subscribe access to a document-sync service.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current value at `path`, or `None` if the node does not exist.
    async fn read(&self, path: &str) -> Result<Option<Value>, Error>;

    /// Append `document` under `collection`; returns the generated key.
    async fn append(&self, collection: &str, document: Value) -> Result<String, Error>;

    /// Open a live subscription to `path`.
    async fn subscribe(&self, path: &str) -> Result<DocumentStream, Error>;
}

// ── Per-device layout ────────────────────────────────────────────────

/// Node paths for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePaths {
    device_id: String,
}

impl DevicePaths {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn root(&self) -> String {
        format!("devices/{}", self.device_id)
    }

    pub fn telemetry(&self) -> String {
        format!("devices/{}/telemetry", self.device_id)
    }

    pub fn presence(&self) -> String {
        format!("devices/{}/presence", self.device_id)
    }

    pub fn commands(&self) -> String {
        format!("devices/{}/commands", self.device_id)
    }
}

// ── Documents ────────────────────────────────────────────────────────

/// Lifecycle marker of a queued command document. The device flips it once
/// it has acted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Done,
    Failed,
}

/// A command queued for the device to pick up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingCommand {
    pub fn new(action: impl Into<String>, params: serde_json::Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            params,
            status: PendingStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// The presence node the device heartbeats into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDocument {
    /// Epoch milliseconds of the device's last heartbeat.
    pub last_seen: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn device_paths() {
        let paths = DevicePaths::new("crow-01");
        assert_eq!(paths.telemetry(), "devices/crow-01/telemetry");
        assert_eq!(paths.presence(), "devices/crow-01/presence");
        assert_eq!(paths.commands(), "devices/crow-01/commands");
    }

    #[test]
    fn pending_command_shape() {
        let mut params = serde_json::Map::new();
        params.insert("volume".into(), serde_json::json!(0.5));
        let doc = serde_json::to_value(PendingCommand::new("SET_VOLUME", params)).unwrap();

        assert_eq!(doc["action"], "SET_VOLUME");
        assert_eq!(doc["params"]["volume"], 0.5);
        assert_eq!(doc["status"], "pending");
        assert!(doc["created_at"].is_string());
    }

    #[test]
    fn presence_uses_camel_case() {
        let doc: PresenceDocument = serde_json::from_str(r#"{"lastSeen":1700000000000}"#).unwrap();
        assert_eq!(doc.last_seen, 1_700_000_000_000);
    }
}
