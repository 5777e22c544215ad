//! CLI configuration: thin wrapper around `scarelink_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides (--host,
//! --cloud-url, --token, ...).

use secrecy::SecretString;

use scarelink_core::ConnectionConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use scarelink_config::{
    Config, Profile, config_path, load_config_or_default, save_config, store_cloud_token,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.profile_name(global.profile.as_deref()).to_owned()
}

/// Translate the active profile + global flags into a `ConnectionConfig`.
///
/// CLI flag overrides take priority over profile values.
pub fn resolve_connection(global: &GlobalOpts) -> Result<ConnectionConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);
    let mut profile = cfg.profile(&profile_name)?;

    // 1. Device host (flag > env > profile)
    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
        profile.socket_host = None;
    }

    // 2. Relay coordinates
    if let Some(ref url) = global.cloud_url {
        profile.cloud_url = Some(url.clone());
    }
    if let Some(ref id) = global.device_id {
        profile.device_id = Some(id.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }

    let mut defaults = cfg.defaults.clone();
    if let Some(secs) = global.timeout {
        defaults.timeout = secs;
    }

    let mut config =
        scarelink_config::profile_to_connection_config(&profile, &profile_name, &defaults)?;

    // 3. Token flag wins over the resolution chain
    if let (Some(cloud), Some(token)) = (config.cloud.as_mut(), global.token.as_ref()) {
        cloud.token = Some(SecretString::from(token.clone()));
    }

    tracing::debug!(
        profile = %profile_name,
        status = %config.status_address,
        socket = %config.socket_address,
        cloud = config.cloud.is_some(),
        "resolved connection config"
    );
    Ok(config)
}
