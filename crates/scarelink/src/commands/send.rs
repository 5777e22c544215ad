//! `scarelink send`: deliver one command over whichever channel is live.

use serde::Serialize;

use scarelink_core::{Command, CommandError, CommandKind, ConnectionConfig, ConnectionManager};

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
struct SendReport {
    command: CommandKind,
    value: Option<f64>,
    via: String,
    success: bool,
}

/// Accept `SOUND_ALARM`, `sound_alarm` and `sound-alarm`.
fn parse_kind(raw: &str) -> Result<CommandKind, CliError> {
    raw.trim()
        .to_ascii_uppercase()
        .replace('-', "_")
        .parse()
        .map_err(|_| {
            CliError::CommandRejected(CommandError::UnknownCommand {
                name: raw.to_owned(),
            })
        })
}

pub async fn handle(
    config: ConnectionConfig,
    args: SendArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let kind = parse_kind(&args.command)?;
    let mut command = Command::new(kind);
    command.value = args.value;
    command.servo = args.servo;

    // Catch bad values before touching the network.
    command.checked_value()?;
    if kind.needs_servo() && command.servo.is_none() {
        return Err(CommandError::MissingServo { command: kind }.into());
    }

    if kind == CommandKind::ResetSystem
        && !util::confirm("Reboot both controller boards?", global.yes)?
    {
        return Ok(());
    }

    let manager = ConnectionManager::from_config(config)?;
    let mode = if args.remote {
        manager.switch_to_remote().await
    } else {
        manager.initialize().await
    };
    let mode = util::require_channel(mode)?;

    let result = manager.router().send(&command).await;
    manager.shutdown().await;

    if let Some(error) = result.error {
        return Err(error.into());
    }

    let report = SendReport {
        command: kind,
        value: command.value,
        via: mode.to_string(),
        success: result.success,
    };
    let out = output::render_single(&global.output, &report, |r| {
        format!("✓ {} sent via {}", r.command, r.via)
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
