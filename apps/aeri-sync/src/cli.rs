use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "aeri-sync",
    about = "Keep an AERI LIGHT controller and this terminal in sync",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "AERI_DEVICE_URL",
        value_name = "URL",
        help = "Controller address (defaults to the access point, http://192.168.4.1)"
    )]
    pub device: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "AERI_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "AERI_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream state, connectivity changes and failed commands until Ctrl-C
    Watch,
    /// Change one field of a zone and wait for the device to confirm
    Set(SetArgs),
    /// Print the device's full state as JSON
    State,
    /// Show the name and summary stored in a preset slot
    Preset(PresetArgs),
    /// Change the controller's 6-digit PIN
    ChangePin(ChangePinArgs),
    /// Restore factory settings on the controller
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Zone key: alis, shroud, demon or sein
    pub zone: String,
    /// Field: mode, speed, brightness, color, color2, color3 or target
    pub field: String,
    /// New value; colors as #rrggbb or r,g,b, targets as left/right/both
    pub value: String,

    #[arg(long, help = "Apply the change to every zone in the sync group")]
    pub sync: bool,

    #[arg(long, help = "Coalesce like a slider instead of sending at once")]
    pub debounced: bool,
}

#[derive(Args, Debug)]
pub struct PresetArgs {
    pub slot: u8,
}

#[derive(Args, Debug)]
pub struct ChangePinArgs {
    #[arg(
        long,
        env = "AERI_AUTH_PIN",
        hide_env_values = true,
        help = "PIN currently configured on the device"
    )]
    pub current: String,

    #[arg(long, help = "New PIN, exactly 6 digits")]
    pub new: String,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    #[arg(long, help = "Confirm the factory reset")]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_set_with_flags() {
        let cli = Cli::try_parse_from([
            "aeri-sync",
            "--device",
            "10.0.0.9",
            "set",
            "alis",
            "brightness",
            "40",
            "--sync",
            "--debounced",
        ])
        .unwrap();
        assert_eq!(cli.device.as_deref(), Some("10.0.0.9"));
        match cli.command {
            Command::Set(args) => {
                assert_eq!((args.zone.as_str(), args.field.as_str(), args.value.as_str()), ("alis", "brightness", "40"));
                assert!(args.sync && args.debounced);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn log_level_is_global() {
        let cli = Cli::try_parse_from(["aeri-sync", "state", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
    }
}
