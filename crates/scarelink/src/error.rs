//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable help.

use miette::Diagnostic;
use thiserror::Error;

use scarelink_config::ConfigError;
use scarelink_core::{CommandError, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Device not reachable at {target}")]
    #[diagnostic(
        code(scarelink::unreachable),
        help(
            "Check that you are on the device's network and the host is right.\n\
             Find devices with: scarelink scan"
        )
    )]
    Unreachable { target: String },

    #[error("No channel to the device")]
    #[diagnostic(
        code(scarelink::no_channel),
        help(
            "The device did not answer locally and no cloud relay is available.\n\
             Configure one with: scarelink config set cloud_url <URL>"
        )
    )]
    NoChannel,

    #[error("Could not connect to {target}")]
    #[diagnostic(code(scarelink::connection_failed))]
    ConnectionFailed {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Cloud relay rejected the credentials")]
    #[diagnostic(
        code(scarelink::auth_failed),
        help("Store a fresh token with: scarelink config set-token --profile {profile}")
    )]
    AuthFailed { profile: String },

    // ── Commands ─────────────────────────────────────────────────────

    #[error("Command rejected: {0}")]
    #[diagnostic(code(scarelink::command_rejected))]
    CommandRejected(#[from] CommandError),

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(scarelink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(scarelink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: scarelink config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(scarelink::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Timed out after {millis}ms")]
    #[diagnostic(
        code(scarelink::timeout),
        help("Increase the probe timeout with --timeout.")
    )]
    Timeout { millis: u64 },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } | Self::NoChannel | Self::ConnectionFailed { .. } => {
                exit_code::CONNECTION
            }
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::CommandRejected(CommandError::UnknownCommand { .. }) | Self::Validation { .. } => {
                exit_code::USAGE
            }
            Self::CommandRejected(CommandError::NotConnected) => exit_code::CONNECTION,
            Self::CommandRejected(_) => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile { name } => {
                let cfg = scarelink_config::load_config_or_default();
                let mut names: Vec<_> = cfg.profiles.into_keys().collect();
                names.sort();
                CliError::ProfileNotFound {
                    name,
                    available: if names.is_empty() {
                        "(none)".into()
                    } else {
                        names.join(", ")
                    },
                }
            }
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { target, reason } => CliError::ConnectionFailed {
                target,
                source: reason.into(),
            },
            CoreError::Unauthorized => CliError::AuthFailed {
                profile: "current".into(),
            },
            CoreError::Timeout { timeout_ms } => CliError::Timeout { millis: timeout_ms },
            CoreError::NotConnected => CliError::NoChannel,
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::InvalidTelemetry(e) => CliError::Internal(e.to_string()),
            CoreError::Protocol { message } | CoreError::Internal(message) => {
                CliError::Internal(message)
            }
        }
    }
}
