// ── Telemetry storage ──
//
// `TelemetryCache` holds the single last-known snapshot that every transport
// feeds. `TelemetryHistory` keeps a bounded trail of recent snapshots for
// trend display.

mod cache;
mod history;

pub use cache::TelemetryCache;
pub use history::{DEFAULT_HISTORY_CAPACITY, TelemetryHistory};
