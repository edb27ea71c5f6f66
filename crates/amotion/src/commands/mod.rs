//! Command dispatch: bridges CLI args -> `Unit` operations -> output formatting.

pub mod config_cmd;
pub mod info;
pub mod set;
pub mod status;
pub mod util;

use amotion_core::Unit;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a unit-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, unit: &Unit, global: &GlobalOpts) -> Result<(), CliError> {
    util::connect(unit, global).await?;

    match cmd {
        Command::Status => status::show(unit, global).await,
        Command::Watch(args) => status::watch(unit, args, global).await,
        Command::Maintenance => status::maintenance(unit, global).await,
        Command::Info => info::show(unit, global),
        Command::Set(args) => set::handle(unit, args, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not need a unit connection".into(),
        )),
    }
}
