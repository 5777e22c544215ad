// ── Domain model ──
//
// Canonical types consumers (CLI, history, router) depend on. Wire shapes
// live in `scarelink_api::telemetry`; `crate::convert` bridges the two.

pub mod command;
pub mod connection;
pub mod telemetry;

// ── Re-exports ──────────────────────────────────────────────────────

pub use command::{Command, CommandError, CommandKind, CommandResult};
pub use connection::{ConnectionEvent, ConnectionMode, ManagerState};
pub use telemetry::{DetectionAlert, TelemetrySnapshot, TelemetrySource};
