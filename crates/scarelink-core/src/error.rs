// ── Core error types ──
//
// Errors that cross the scarelink-core API. Transport failures inside the
// channels never surface here; they are absorbed by the reconnect policy and
// reported as connectivity events. What remains is construction, validation
// and subscription setup.

use thiserror::Error;

use crate::convert::TelemetryError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Cloud relay rejected the credentials")]
    Unauthorized,

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Not connected")]
    NotConnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Invalid telemetry: {0}")]
    InvalidTelemetry(#[from] TelemetryError),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<scarelink_api::Error> for CoreError {
    fn from(err: scarelink_api::Error) -> Self {
        use scarelink_api::Error as Api;

        match err {
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else {
                    CoreError::ConnectionFailed {
                        target: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Status { status, url } => CoreError::ConnectionFailed {
                target: url,
                reason: format!("HTTP {status}"),
            },
            Api::Deserialization { message, body: _ } => CoreError::Protocol { message },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                target: "socket".into(),
                reason,
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                target: "socket".into(),
                reason: format!("closed (code {code}): {reason}"),
            },
            Api::StreamEnded(reason) => CoreError::ConnectionFailed {
                target: "cloud relay".into(),
                reason,
            },
            Api::Unauthorized => CoreError::Unauthorized,
        }
    }
}
