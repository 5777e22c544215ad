//! `scarelink watch`: stream telemetry until Ctrl-C.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use scarelink_core::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, DEFAULT_HISTORY_CAPACITY,
    DetectionAlert, TelemetryHistory, TelemetrySnapshot,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util::{self, opt};

/// One line of the watch feed.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FeedItem {
    Telemetry(Arc<TelemetrySnapshot>),
    Detection(DetectionAlert),
    Connection(ConnectionEvent),
}

#[derive(Debug, Serialize)]
struct Trend {
    field: &'static str,
    samples: usize,
    min: f64,
    max: f64,
    mean: f64,
}

fn trend(
    history: &TelemetryHistory,
    field: &'static str,
    f: fn(&TelemetrySnapshot) -> Option<f64>,
) -> Option<Trend> {
    let series = history.series(f);
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    #[allow(clippy::cast_precision_loss)]
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(Trend {
        field,
        samples: values.len(),
        min,
        max,
        mean,
    })
}

fn line(item: &FeedItem, color: bool) -> String {
    match item {
        FeedItem::Telemetry(s) => format!(
            "{} [{}] soil {}%  temp {}°C  motion {}  volume {}  birds {}",
            s.received_at.format("%H:%M:%S"),
            s.source,
            opt(s.soil_humidity),
            opt(s.temperature),
            opt(s.motion),
            opt(s.volume),
            opt(s.birds_detected),
        ),
        FeedItem::Detection(a) => format!(
            "{} detection: {} x{} (confidence {})",
            a.received_at.format("%H:%M:%S"),
            a.label,
            a.count,
            opt(a.confidence)
        ),
        FeedItem::Connection(e) => format!(
            "connection: {} {}",
            output::mode_label(e.mode, color),
            output::link_label(e.connected, color)
        ),
    }
}

fn emit(item: &FeedItem, global: &GlobalOpts, color: bool) {
    let out = match global.output {
        OutputFormat::Table => line(item, color),
        // One document per line so the feed can be piped.
        OutputFormat::Json | OutputFormat::JsonCompact => {
            output::render_single(&OutputFormat::JsonCompact, item, |_| String::new())
        }
        OutputFormat::Yaml => format!(
            "---\n{}",
            output::render_single(&global.output, item, |_| String::new())
        ),
    };
    output::print_output(&out, global.quiet);
}

pub async fn handle(
    config: ConnectionConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let manager = ConnectionManager::from_config(config)?;
    let color = output::should_color(&global.color);

    let mut events = manager.subscribe();
    let mode = util::require_channel(manager.initialize().await)?;
    tracing::info!(%mode, "watching");

    let history = TelemetryHistory::attach(manager.cache(), DEFAULT_HISTORY_CAPACITY);
    let mut telemetry = manager.cache().subscribe();
    let mut alerts = manager.cache().alerts();
    let mut seen = 0usize;

    if let Some(snapshot) = telemetry.current() {
        emit(&FeedItem::Telemetry(Arc::clone(snapshot)), global, color);
        seen += 1;
    }

    while args.count.is_none_or(|limit| seen < limit) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = telemetry.changed() => {
                let Some(snapshot) = snapshot else { break };
                emit(&FeedItem::Telemetry(snapshot), global, color);
                seen += 1;
            }
            alert = alerts.recv() => match alert {
                Ok(alert) => emit(&FeedItem::Detection(alert), global, color),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "detection feed lagged"),
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => emit(&FeedItem::Connection(event), global, color),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;

    if args.summary {
        let trends: Vec<Trend> = [
            trend(&history, "soil_humidity", |s| s.soil_humidity),
            trend(&history, "temperature", |s| s.temperature),
            trend(&history, "air_humidity", |s| s.air_humidity),
            trend(&history, "light_level", |s| s.light_level),
        ]
        .into_iter()
        .flatten()
        .collect();

        let out = output::render_single(&global.output, &trends, |ts| {
            ts.iter()
                .map(|t| {
                    format!(
                        "{:<14} n={:<4} min {:.1}  max {:.1}  mean {:.1}",
                        t.field, t.samples, t.min, t.max, t.mean
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        });
        output::print_output(&out, global.quiet);
    }
    Ok(())
}
