//! `scarelink status`: arbitrate once and report what came up.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;

use scarelink_core::{
    ChannelHealth, ConnectionConfig, ConnectionManager, ConnectionMode, ManagerState,
    TelemetrySnapshot,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::util::{self, opt};

#[derive(Debug, Serialize)]
struct StatusReport {
    mode: ConnectionMode,
    state: ManagerState,
    /// Local mode with only one of poll and socket up.
    partial: bool,
    poll: ChannelHealth,
    socket: ChannelHealth,
    cloud_connected: bool,
    telemetry: Option<Arc<TelemetrySnapshot>>,
}

#[derive(Tabled)]
struct ReadingRow {
    #[tabled(rename = "Reading")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn readings(s: &TelemetrySnapshot) -> Vec<ReadingRow> {
    let row = |name, value| ReadingRow { name, value };
    vec![
        row("soil humidity %", opt(s.soil_humidity)),
        row("temperature °C", opt(s.temperature)),
        row("air humidity %", opt(s.air_humidity)),
        row("light", opt(s.light_level)),
        row("motion", opt(s.motion)),
        row("servo left/right/head", format!(
            "{} / {} / {}",
            opt(s.servo_left),
            opt(s.servo_right),
            opt(s.servo_head)
        )),
        row("track", opt(s.track_index)),
        row("volume", opt(s.volume)),
        row("playing", opt(s.playing)),
        row("detection", opt(s.detection_enabled)),
        row("birds detected", opt(s.birds_detected)),
        row("uptime s", opt(s.uptime_secs)),
        row("rssi dBm", opt(s.rssi)),
        row("source", s.source.to_string()),
        row("received", s.received_at.format("%H:%M:%S").to_string()),
    ]
}

fn link_line(name: &str, health: &ChannelHealth, color: bool) -> String {
    let mut line = format!("{name:<7} {}", output::link_label(health.connected, color));
    if health.reconnect_attempts > 0 {
        let _ = write!(line, "  (attempt {})", health.reconnect_attempts);
    }
    if let Some(ref err) = health.last_error {
        let _ = write!(line, "  last error: {err}");
    }
    line
}

pub async fn handle(config: ConnectionConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let wait = config.poll_interval + Duration::from_secs(1);
    let manager = ConnectionManager::from_config(config)?;
    let mode = manager.initialize().await;

    let telemetry = if mode == ConnectionMode::None {
        None
    } else {
        util::first_snapshot(&manager, wait).await
    };
    let health = manager.local_health();
    let report = StatusReport {
        mode,
        state: manager.state(),
        partial: mode == ConnectionMode::Local && health.is_partial(),
        poll: health.poll,
        socket: health.socket,
        cloud_connected: manager.cloud_connected(),
        telemetry,
    };
    manager.shutdown().await;

    let color = output::should_color(&global.color);
    let out = output::render_single(&global.output, &report, |r| {
        let mut text = format!("mode    {}", output::mode_label(r.mode, color));
        text.push_str(if r.partial { " (partial)\n" } else { "\n" });
        let _ = writeln!(text, "{}", link_line("poll", &r.poll, color));
        let _ = writeln!(text, "{}", link_line("socket", &r.socket, color));
        let _ = writeln!(text, "cloud   {}", output::link_label(r.cloud_connected, color));
        match r.telemetry {
            Some(ref snapshot) => text.push_str(&output::render_table(&readings(snapshot))),
            None => text.push_str("no telemetry yet"),
        }
        text
    });
    output::print_output(&out, global.quiet);

    util::require_channel(mode).map(|_| ())
}
