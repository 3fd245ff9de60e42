//! Command dispatch: bridges CLI args -> `FleetSync` operations -> output.

pub mod config_cmd;
pub mod devices;
pub mod login;
pub mod positions;
pub mod send;
pub mod sync;
pub mod watch;

use fleetsync_core::SyncConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a provider-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: SyncConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Login => login::handle(config, global).await,
        Command::Devices => devices::handle(config, global).await,
        Command::Positions(args) => positions::handle(config, args, global).await,
        Command::Sync => sync::handle(config, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Send(args) => send::handle(config, args, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions run without a provider connection".into(),
        )),
    }
}
