//! Log verbosity and output format flags.

use clap::{
    builder::{PossibleValuesParser, TypedValueParser, ValueParser},
    Arg, ArgAction, ArgMatches, Command,
};
use tracing::Level;

use crate::cli::telemetry::{LogFormat, LogSettings};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

/// Index is the verbosity count the name stands for.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accepts a count (`TOURGATE_LOG_LEVEL=3`) or a level name (`debug`).
fn parse_verbosity(level: &str) -> Result<u8, String> {
    let level = level.trim();
    if let Ok(count) = level.parse::<u8>() {
        return if count <= 5 {
            Ok(count)
        } else {
            Err(format!("verbosity {count} is out of range (0-5)"))
        };
    }
    LEVEL_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(level))
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| {
            format!(
                "unknown log level `{level}`, expected one of: {}",
                LEVEL_NAMES.join(", ")
            )
        })
}

/// Zero `-v` keeps errors only; each extra `-v` opens one level.
#[must_use]
pub const fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("TOURGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(ValueParser::from(parse_verbosity)),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long("log-format")
                .help("Log output: human readable or one JSON object per line")
                .env("TOURGATE_LOG_FORMAT")
                .global(true)
                .default_value("pretty")
                .value_parser(
                    PossibleValuesParser::new(["pretty", "json"]).map(|format: String| {
                        if format == "json" {
                            LogFormat::Json
                        } else {
                            LogFormat::Pretty
                        }
                    }),
                ),
        )
}

/// Read the logging flags back out of parsed matches.
#[must_use]
pub fn settings(matches: &ArgMatches) -> LogSettings {
    let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
    LogSettings {
        level: level_for(verbosity),
        format: matches
            .get_one::<LogFormat>(ARG_LOG_FORMAT)
            .copied()
            .unwrap_or_default(),
    }
}
