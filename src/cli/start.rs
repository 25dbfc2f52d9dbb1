use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;
use clap::ArgMatches;
use tracing::Level;

/// `-v` count to tracing level. No flag keeps the subscriber default.
fn verbosity_level(matches: &ArgMatches) -> Option<Level> {
    match matches
        .get_one::<u8>(commands::logging::ARG_VERBOSITY)
        .copied()
        .unwrap_or_default()
    {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// Parse the command line, install telemetry and resolve the action to run.
///
/// # Errors
/// Returns an error if telemetry cannot be initialized or the arguments do not
/// describe a runnable action.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();
    telemetry::init(verbosity_level(&matches))?;
    dispatch::handler(&matches)
}
