//! `scarelink probe`: one bounded reachability check of the status endpoint.

use std::time::Instant;

use serde::Serialize;

use scarelink_core::{ConnectionConfig, CoreError, DeviceProbe, TransportConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ProbeReport {
    address: String,
    reachable: bool,
    elapsed_ms: u64,
}

pub async fn handle(config: &ConnectionConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let transport = TransportConfig::local(config.probe_timeout);
    let probe = DeviceProbe::new(&transport).map_err(CoreError::from)?;

    let started = Instant::now();
    let reachable = probe
        .probe(&config.status_address, config.probe_timeout)
        .await;
    let report = ProbeReport {
        address: config.status_address.to_string(),
        reachable,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(&global.output, &report, |r| {
        format!(
            "{}  {}  ({} ms)",
            r.address,
            output::link_label(r.reachable, color),
            r.elapsed_ms
        )
    });
    output::print_output(&out, global.quiet);

    if reachable {
        Ok(())
    } else {
        Err(CliError::Unreachable {
            target: report.address,
        })
    }
}
