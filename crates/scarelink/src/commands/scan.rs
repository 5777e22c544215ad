//! `scarelink scan`: sweep a /24 for devices.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;

use scarelink_core::{CoreError, DeviceAddress, DeviceProbe, TransportConfig};

use crate::cli::{GlobalOpts, OutputFormat, ScanArgs};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ScanHit {
    host: String,
    port: u16,
    path: String,
}

impl From<&DeviceAddress> for ScanHit {
    fn from(address: &DeviceAddress) -> Self {
        Self {
            host: address.host.clone(),
            port: address.port,
            path: address.path.clone(),
        }
    }
}

#[derive(Tabled)]
struct ScanRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Endpoint")]
    path: String,
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ScanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.start > args.end {
        return Err(CliError::Validation {
            field: "start".into(),
            reason: format!("{} is after {}", args.start, args.end),
        });
    }

    let timeout = Duration::from_millis(args.host_timeout_ms);
    let probe = DeviceProbe::new(&TransportConfig::local(timeout)).map_err(CoreError::from)?;

    let interactive = !global.quiet && matches!(global.output, OutputFormat::Table);
    let bar = if interactive {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::with_template("{spinner} scanning {msg} [{bar:30}] {pos}%") {
            bar.set_style(style);
        }
        bar.set_message(format!("{}/24", args.subnet));
        bar
    } else {
        ProgressBar::hidden()
    };

    let found = probe
        .scan_range(args.subnet, args.start, args.end, timeout, |fraction| {
            // Fraction is 0.0..=1.0, so the product fits.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            bar.set_position((fraction * 100.0).round() as u64);
        })
        .await;
    bar.finish_and_clear();

    let hits: Vec<ScanHit> = found.iter().map(ScanHit::from).collect();
    if hits.is_empty() && interactive {
        eprintln!("No devices found in {}/24", args.subnet);
        return Ok(());
    }

    let out = output::render_list(&global.output, &hits, |h| ScanRow {
        host: h.host.clone(),
        port: h.port,
        path: h.path.clone(),
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
