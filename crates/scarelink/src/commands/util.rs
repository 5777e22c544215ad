//! Shared helpers for command handlers.

use std::time::Duration;

use scarelink_core::{ConnectionManager, ConnectionMode, TelemetrySnapshot};

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Fail with a connection error when arbitration found no channel.
pub fn require_channel(mode: ConnectionMode) -> Result<ConnectionMode, CliError> {
    if mode == ConnectionMode::None {
        Err(CliError::NoChannel)
    } else {
        Ok(mode)
    }
}

/// The cached snapshot, or the first one to arrive within `wait`.
pub async fn first_snapshot(
    manager: &ConnectionManager,
    wait: Duration,
) -> Option<std::sync::Arc<TelemetrySnapshot>> {
    let mut stream = manager.cache().subscribe();
    if let Some(snapshot) = stream.current() {
        return Some(std::sync::Arc::clone(snapshot));
    }
    tokio::time::timeout(wait, stream.changed()).await.ok().flatten()
}

/// `12.5` or `-` for an unknown reading.
pub fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}
