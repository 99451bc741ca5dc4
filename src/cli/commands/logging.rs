//! `-v` flags, or `TEXGATE_LOG_LEVEL` given as a level name or a count.

use clap::{Arg, ArgAction, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names in verbosity order; the index is the equivalent `-v` count.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

const MAX_VERBOSITY: u8 = 5;

fn parse_verbosity(level: &str) -> Result<u8, String> {
    let level = level.trim();
    if let Ok(count) = level.parse::<u8>() {
        return if count <= MAX_VERBOSITY {
            Ok(count)
        } else {
            Err(format!("verbosity {count} is above {MAX_VERBOSITY}"))
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

#[must_use]
pub fn verbosity_parser() -> ValueParser {
    ValueParser::from(parse_verbosity)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log verbosity: repeat -v, or set ERROR, WARN, INFO, DEBUG or TRACE (default: ERROR)")
            .env("TEXGATE_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(verbosity_parser()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_map_to_counts() {
        assert_eq!(parse_verbosity("error"), Ok(0));
        assert_eq!(parse_verbosity("WARN"), Ok(1));
        assert_eq!(parse_verbosity(" Debug "), Ok(3));
        assert_eq!(parse_verbosity("trace"), Ok(4));
    }

    #[test]
    fn counts_are_bounded() {
        assert_eq!(parse_verbosity("5"), Ok(5));
        assert!(parse_verbosity("6").is_err());
        assert!(parse_verbosity("loud").is_err());
    }
}
