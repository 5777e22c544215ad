//! Shared configuration for the scarelink CLI.
//!
//! TOML profiles, cloud token resolution (env + keyring + plaintext),
//! and translation to `scarelink_core::ConnectionConfig`. The CLI layers
//! its flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scarelink_core::{CloudConfig, ConnectionConfig, DEFAULT_DEVICE_HOST, DeviceAddress, TlsMode};

/// Keyring service name; entries are keyed `<profile>/cloud-token`.
pub const KEYRING_SERVICE: &str = "scarelink";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: the explicit one, else the default.
    pub fn profile_name<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
    }

    /// Look up a profile. A missing `default` profile resolves to the
    /// built-in defaults so a fresh install works against a factory device.
    pub fn profile(&self, name: &str) -> Result<Profile, ConfigError> {
        match self.profiles.get(name) {
            Some(profile) => Ok(profile.clone()),
            None if name == "default" => Ok(Profile::default()),
            None => Err(ConfigError::UnknownProfile { name: name.into() }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Probe timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    5
}

/// A named device profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Camera board host (and actuator board host unless `socket_host` is set).
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_status_port")]
    pub status_port: u16,

    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Actuator board host, when it differs from `host`.
    pub socket_host: Option<String>,

    #[serde(default = "default_socket_port")]
    pub socket_port: u16,

    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Status poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,

    /// Bound on a local connect attempt in milliseconds.
    pub connect_timeout_ms: Option<u64>,

    /// Delay between socket reconnect attempts in milliseconds.
    pub reconnect_interval_ms: Option<u64>,

    pub max_reconnect_attempts: Option<u32>,

    pub poll_failure_threshold: Option<u32>,

    /// Cloud relay base URL. Leaving it unset disables remote mode.
    pub cloud_url: Option<String>,

    /// Device key on the relay.
    pub device_id: Option<String>,

    /// Relay token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the relay token.
    pub token_env: Option<String>,

    /// Path to a custom CA certificate for the relay.
    pub ca_cert: Option<PathBuf>,

    /// Accept any relay certificate.
    pub insecure: Option<bool>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            host: default_host(),
            status_port: default_status_port(),
            status_path: default_status_path(),
            socket_host: None,
            socket_port: default_socket_port(),
            socket_path: default_socket_path(),
            poll_interval_ms: None,
            connect_timeout_ms: None,
            reconnect_interval_ms: None,
            max_reconnect_attempts: None,
            poll_failure_threshold: None,
            cloud_url: None,
            device_id: None,
            token: None,
            token_env: None,
            ca_cert: None,
            insecure: None,
        }
    }
}

fn default_host() -> String {
    DEFAULT_DEVICE_HOST.into()
}
fn default_status_port() -> u16 {
    80
}
fn default_status_path() -> String {
    "/status".into()
}
fn default_socket_port() -> u16 {
    81
}
fn default_socket_path() -> String {
    "/ws".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "scarelink", "scarelink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("scarelink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, overlaid with `SCARELINK_*` variables
/// (`SCARELINK_DEFAULT_PROFILE`, `SCARELINK_PROFILES__FIELD__HOST`, ...).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SCARELINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file is missing or broken.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{profile_name}/cloud-token"),
    )?)
}

/// Store a relay token in the system keyring.
pub fn store_cloud_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(token)?;
    Ok(())
}

/// Resolve the relay token: `token_env` variable, then the system keyring,
/// then the plaintext `token` field. `None` means the relay is used
/// unauthenticated.
pub fn resolve_cloud_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

// ── Translation ─────────────────────────────────────────────────────

fn millis(value: Option<u64>, fallback: Duration) -> Duration {
    value.map_or(fallback, Duration::from_millis)
}

fn validate_path(field: &str, path: &str) -> Result<(), ConfigError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            field: field.into(),
            reason: format!("must start with '/', got '{path}'"),
        })
    }
}

/// Build the relay config for a profile, if it names a relay.
pub fn profile_to_cloud_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<CloudConfig>, ConfigError> {
    let Some(ref raw) = profile.cloud_url else {
        return Ok(None);
    };
    let base_url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "cloud_url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    let device_id = profile
        .device_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ConfigError::Validation {
            field: "device_id".into(),
            reason: "required when cloud_url is set".into(),
        })?;

    let mut cloud = CloudConfig::new(base_url, device_id);
    cloud.token = resolve_cloud_token(profile, profile_name);
    cloud.tls = if profile.insecure.unwrap_or(false) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    Ok(Some(cloud))
}

/// Build a `ConnectionConfig` from a profile, with no CLI flag overrides.
pub fn profile_to_connection_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ConnectionConfig, ConfigError> {
    if profile.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: "must not be empty".into(),
        });
    }
    validate_path("status_path", &profile.status_path)?;
    validate_path("socket_path", &profile.socket_path)?;

    let base = ConnectionConfig::for_host(&profile.host);
    let socket_host = profile.socket_host.as_deref().unwrap_or(&profile.host);

    Ok(ConnectionConfig {
        status_address: DeviceAddress::new(
            &profile.host,
            profile.status_port,
            &profile.status_path,
        ),
        socket_address: DeviceAddress::new(socket_host, profile.socket_port, &profile.socket_path),
        poll_interval: millis(profile.poll_interval_ms, base.poll_interval),
        probe_timeout: Duration::from_secs(defaults.timeout),
        connect_timeout: millis(profile.connect_timeout_ms, base.connect_timeout),
        reconnect_interval: millis(profile.reconnect_interval_ms, base.reconnect_interval),
        max_reconnect_attempts: profile
            .max_reconnect_attempts
            .unwrap_or(base.max_reconnect_attempts),
        poll_failure_threshold: profile
            .poll_failure_threshold
            .unwrap_or(base.poll_failure_threshold),
        cloud: profile_to_cloud_config(profile, profile_name)?,
        ..base
    })
}
