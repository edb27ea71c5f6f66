//! `set` handlers: one acknowledged `control` write each.

use amotion_core::{Command, Unit};

use crate::cli::{GlobalOpts, SetArgs, SetCommand};
use crate::error::CliError;
use crate::output;

fn to_command(cmd: &SetCommand) -> Command {
    match *cmd {
        SetCommand::Temperature { celsius } => Command::SetTemperature(celsius),
        SetCommand::Fan { percent } => Command::SetFan(percent),
        SetCommand::Mode { regime } => Command::SetMode(regime),
    }
}

fn describe(cmd: &SetCommand) -> String {
    match cmd {
        SetCommand::Temperature { celsius } => format!("Temperature set to {celsius:.1} °C"),
        SetCommand::Fan { percent } => format!("Fan set to {percent} %"),
        SetCommand::Mode { regime } => format!("Mode set to {regime}"),
    }
}

pub async fn handle(unit: &Unit, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    unit.execute(to_command(&args.command)).await?;
    output::print_success(
        &describe(&args.command),
        output::should_color(global.color),
        global.quiet,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use amotion_core::WorkRegime;

    use super::*;

    #[test]
    fn set_commands_map_to_control_writes() {
        let cmd = SetCommand::Mode {
            regime: WorkRegime::NightPrecooling,
        };
        assert_eq!(to_command(&cmd), Command::SetMode(WorkRegime::NightPrecooling));
        assert_eq!(describe(&cmd), "Mode set to NIGHT_PRECOOLING");
        assert_eq!(
            describe(&SetCommand::Temperature { celsius: 21.5 }),
            "Temperature set to 21.5 °C"
        );
    }
}
