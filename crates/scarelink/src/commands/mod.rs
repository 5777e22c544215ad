//! Command dispatch: bridges CLI args -> core manager/router -> output.

pub mod config_cmd;
pub mod probe;
pub mod scan;
pub mod send;
pub mod status;
pub mod util;
pub mod watch;

use scarelink_core::ConnectionConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: ConnectionConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Probe => probe::handle(&config, global).await,
        Command::Scan(args) => scan::handle(args, global).await,
        Command::Status => status::handle(config, global).await,
        Command::Send(args) => send::handle(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
