//! Clap derive structures for the `scarelink` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::net::Ipv4Addr;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use scarelink_core::ServoId;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// scarelink -- reach a scarecrow device locally or through the cloud relay
#[derive(Debug, Parser)]
#[command(
    name = "scarelink",
    version,
    about = "Monitor and control scarecrow field devices",
    long_about = "Talks to a scarecrow field device directly on the local network \
        (HTTP status polling plus a WebSocket) and falls back to the cloud relay \
        when the device is out of reach.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device profile to use
    #[arg(long, short = 'p', env = "SCARELINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Device host (overrides profile)
    #[arg(long, short = 'H', env = "SCARELINK_HOST", global = true)]
    pub host: Option<String>,

    /// Cloud relay base URL (overrides profile)
    #[arg(long, env = "SCARELINK_CLOUD_URL", global = true)]
    pub cloud_url: Option<String>,

    /// Device key on the cloud relay (overrides profile)
    #[arg(long, env = "SCARELINK_DEVICE_ID", global = true)]
    pub device_id: Option<String>,

    /// Cloud relay token
    #[arg(long, env = "SCARELINK_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SCARELINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed relay certificates
    #[arg(long, short = 'k', env = "SCARELINK_INSECURE", global = true)]
    pub insecure: bool,

    /// Probe timeout in seconds
    #[arg(long, env = "SCARELINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check whether the device answers on the local network
    Probe,

    /// Scan a /24 for devices answering on well-known endpoints
    Scan(ScanArgs),

    /// Pick a channel and show mode, link health and latest telemetry
    #[command(alias = "st")]
    Status,

    /// Send a command to the device
    Send(SendArgs),

    /// Stream telemetry, detections and connection changes until Ctrl-C
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Any address in the /24 to scan
    #[arg(default_value = "192.168.4.0")]
    pub subnet: Ipv4Addr,

    /// First host octet
    #[arg(long, default_value = "1")]
    pub start: u8,

    /// Last host octet
    #[arg(long, default_value = "254")]
    pub end: u8,

    /// Per-host timeout in milliseconds
    #[arg(long, default_value = "800")]
    pub host_timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Command name, e.g. SOUND_ALARM or set_volume
    pub command: String,

    /// Command value (volume 0-1, track number, angle, ...)
    #[arg(allow_negative_numbers = true)]
    pub value: Option<f64>,

    /// Servo for SET_SERVO_ANGLE
    #[arg(long, value_parser = parse_servo)]
    pub servo: Option<ServoId>,

    /// Skip the local probe and go straight to the cloud relay
    #[arg(long)]
    pub remote: bool,
}

fn parse_servo(raw: &str) -> Result<ServoId, String> {
    raw.parse()
        .map_err(|_| format!("expected left, right or head, got '{raw}'"))
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many snapshots
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Print a trend summary of the recent history on exit
    #[arg(long)]
    pub summary: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive setup wizard
    Init,

    /// Show the current configuration (secrets redacted)
    Show,

    /// Print the config file path
    Path,

    /// Set one field on a profile
    Set {
        /// Field name, e.g. host, cloud_url, device_id, poll_interval_ms
        key: String,
        /// New value
        value: String,
    },

    /// Store the cloud relay token in the system keyring
    SetToken,

    /// List profiles
    Profiles,

    /// Make a profile the default
    Use {
        /// Profile name
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}
