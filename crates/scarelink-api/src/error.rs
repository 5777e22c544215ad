use thiserror::Error;

/// Top-level error type for the `scarelink-api` crate.
///
/// Covers every wire-level failure mode: HTTP transport, the camera board's
/// status and control endpoints, the actuator WebSocket, and the cloud
/// document store. `scarelink-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Endpoint answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Cloud ───────────────────────────────────────────────────────
    /// The cloud stream reported a terminal condition (`cancel`, `auth_revoked`).
    #[error("Cloud subscription ended: {0}")]
    StreamEnded(String),

    /// Cloud rejected the credentials.
    #[error("Cloud authentication rejected")]
    Unauthorized,
}

impl Error {
    /// Returns `true` if the error means the endpoint could not be reached
    /// at all (refused, unroutable, timed out) as opposed to answering badly.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
