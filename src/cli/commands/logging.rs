use clap::{Arg, ArgAction, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accept either a count (0-5) or a level name.
fn parse_level(value: &str) -> Result<u8, String> {
    let value = value.trim().to_ascii_lowercase();
    if let Ok(count) = value.parse::<u8>() {
        return if count <= 5 {
            Ok(count)
        } else {
            Err(format!("log level out of range: {count}"))
        };
    }

    LEVELS
        .iter()
        .position(|level| *level == value)
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("invalid log level: {value}"))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("WARDEN_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::from(parse_level)),
    )
}
