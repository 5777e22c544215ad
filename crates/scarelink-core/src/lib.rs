//! Hybrid connectivity layer between `scarelink-api` and the CLI.
//!
//! A scarecrow field device is reached either directly on the local network
//! (an HTTP status endpoint on the camera board plus a WebSocket on the
//! actuator board) or through a cloud document relay. This crate decides
//! which one is live and keeps telemetry and commands flowing through it:
//!
//! - **[`ConnectionManager`]**: state machine that probes the device, falls
//!   back to the relay, and publishes [`ConnectionEvent`]s. A concurrent
//!   second [`initialize()`](ConnectionManager::initialize) is a no-op.
//!
//! - **[`CommandRouter`]**: one `send_command(name, value)` entry point that
//!   maps each command onto socket frames, camera controls, or a queued cloud
//!   command, depending on the current [`ConnectionMode`].
//!
//! - **[`TelemetryCache`]**: the last validated [`TelemetrySnapshot`], fed by
//!   every transport and observed through [`TelemetryStream`] or callbacks.
//!
//! - **Channels** ([`channel`]): [`LocalChannel`] and [`CloudChannel`], each
//!   behind a trait so the manager and router can be driven by fakes.

pub mod channel;
pub mod config;
pub mod convert;
pub mod error;
pub mod manager;
pub mod model;
pub mod router;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{
    CloudChannel, CloudTransport, Link, LinkEvent, LocalChannel, LocalHealth, LocalTransport,
};
pub use config::{CloudConfig, ConnectionConfig, DEFAULT_DEVICE_HOST};
pub use convert::{TelemetryError, snapshot_from_payload};
pub use error::CoreError;
pub use manager::ConnectionManager;
pub use router::{CommandRouter, LocalCall};
pub use store::{DEFAULT_HISTORY_CAPACITY, TelemetryCache, TelemetryHistory};
pub use stream::{Subscription, TelemetryStream, TelemetryWatchStream};

pub use model::{
    Command, CommandError, CommandKind, CommandResult, ConnectionEvent, ConnectionMode,
    DetectionAlert, ManagerState, TelemetrySnapshot, TelemetrySource,
};

// Wire types callers need to build commands and addresses.
pub use scarelink_api::{
    ChannelHealth, DeviceAddress, DeviceProbe, ServoId, TlsMode, TransportConfig,
};
