//! Line grammar for the emulator console.
//!
//! Every command is a keyword followed by space separated arguments. The
//! parser is a handful of `winnow` combinators over `&str`; anything that
//! does not match exactly, including trailing garbage, is a syntax error.

use core::fmt;
use core::time::Duration;

use node_core::sensor::SensorFault;
use winnow::ascii::{dec_int, dec_uint, space0, space1};
use winnow::combinator::{alt, fail, opt, preceded};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take_while;

/// Validity of an external-data overlay when the command omits it.
pub const DEFAULT_EXT_SECS: u32 = 60;

/// Parsed console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Let simulated time pass.
    Run(Duration),
    /// Run exactly one loop iteration without advancing time.
    Step,
    /// Fail the next collect with the given fault.
    Fault(SensorFault),
    Update(bool),
    Link(bool),
    Traffic(bool),
    /// Hold the button down for the given time.
    Press(Duration),
    Ext {
        big_x10: i16,
        small_x10: i16,
        valid_for_secs: u32,
    },
    Climate {
        temperature_deci_c: i16,
        humidity_pct: u8,
    },
    /// Deliver the next armed wake this much later than requested.
    Late(Duration),
    Trace(bool),
    Status,
    Log(Option<usize>),
    Help(Option<&'a str>),
}

/// Rejected input, with the byte offset where parsing stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntaxError {
    pub offset: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected input at column {}", self.offset + 1)
    }
}

impl std::error::Error for SyntaxError {}

/// Parses one console line.
///
/// # Errors
///
/// Returns [`SyntaxError`] when the line is not a complete command.
pub fn parse(line: &str) -> Result<Command<'_>, SyntaxError> {
    command
        .parse(line)
        .map_err(|error| SyntaxError {
            offset: error.offset(),
        })
}

fn command<'a>(input: &mut &'a str) -> Result<Command<'a>, ContextError> {
    space0.parse_next(input)?;
    let keyword = word.parse_next(input)?;

    let command = match keyword {
        "run" => Command::Run(preceded(space1, duration).parse_next(input)?),
        "step" => Command::Step,
        "fault" => Command::Fault(preceded(space1, fault_kind).parse_next(input)?),
        "update" => Command::Update(preceded(space1, switch).parse_next(input)?),
        "link" => Command::Link(preceded(space1, switch).parse_next(input)?),
        "traffic" => Command::Traffic(preceded(space1, switch).parse_next(input)?),
        "press" => Command::Press(preceded(space1, duration).parse_next(input)?),
        "ext" => {
            let big_x10 = preceded(space1, dec_int).parse_next(input)?;
            let small_x10 = preceded(space1, dec_int).parse_next(input)?;
            let valid_for_secs = opt(preceded(space1, dec_uint))
                .parse_next(input)?
                .unwrap_or(DEFAULT_EXT_SECS);
            Command::Ext {
                big_x10,
                small_x10,
                valid_for_secs,
            }
        }
        "climate" => {
            let temperature_deci_c = preceded(space1, dec_int).parse_next(input)?;
            let humidity_pct = preceded(space1, dec_uint).parse_next(input)?;
            Command::Climate {
                temperature_deci_c,
                humidity_pct,
            }
        }
        "late" => Command::Late(preceded(space1, duration).parse_next(input)?),
        "trace" => Command::Trace(preceded(space1, switch).parse_next(input)?),
        "status" => Command::Status,
        "log" => Command::Log(opt(preceded(space1, dec_uint)).parse_next(input)?),
        "help" => Command::Help(opt(preceded(space1, word)).parse_next(input)?),
        _ => return fail.parse_next(input),
    };

    space0.parse_next(input)?;
    Ok(command)
}

fn word<'a>(input: &mut &'a str) -> Result<&'a str, ContextError> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-').parse_next(input)
}

fn duration(input: &mut &str) -> Result<Duration, ContextError> {
    let value: u64 = dec_uint.parse_next(input)?;
    let micros_per_unit: u64 =
        alt(("ms".value(1_000), "us".value(1), "s".value(1_000_000))).parse_next(input)?;
    Ok(Duration::from_micros(value.saturating_mul(micros_per_unit)))
}

fn switch(input: &mut &str) -> Result<bool, ContextError> {
    alt(("on".value(true), "off".value(false))).parse_next(input)
}

fn fault_kind(input: &mut &str) -> Result<SensorFault, ContextError> {
    alt((
        "checksum".value(SensorFault::Checksum),
        "invalid".value(SensorFault::InvalidData),
        "bus".value(SensorFault::Bus),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations_with_units() {
        assert_eq!(parse("run 10s"), Ok(Command::Run(Duration::from_secs(10))));
        assert_eq!(
            parse("run 2450ms"),
            Ok(Command::Run(Duration::from_millis(2_450)))
        );
        assert_eq!(
            parse("late 300us"),
            Ok(Command::Late(Duration::from_micros(300)))
        );
        assert!(parse("run 10").is_err());
        assert!(parse("run").is_err());
    }

    #[test]
    fn parses_switches_and_faults() {
        assert_eq!(parse("update on"), Ok(Command::Update(true)));
        assert_eq!(parse("  link off  "), Ok(Command::Link(false)));
        assert_eq!(
            parse("fault checksum"),
            Ok(Command::Fault(SensorFault::Checksum))
        );
        assert_eq!(parse("fault bus"), Ok(Command::Fault(SensorFault::Bus)));
        assert!(parse("update maybe").is_err());
    }

    #[test]
    fn ext_validity_defaults_when_omitted() {
        assert_eq!(
            parse("ext 421 -15"),
            Ok(Command::Ext {
                big_x10: 421,
                small_x10: -15,
                valid_for_secs: DEFAULT_EXT_SECS
            })
        );
        assert_eq!(
            parse("ext 1 2 5"),
            Ok(Command::Ext {
                big_x10: 1,
                small_x10: 2,
                valid_for_secs: 5
            })
        );
    }

    #[test]
    fn parses_climate_and_optional_arguments() {
        assert_eq!(
            parse("climate -53 80"),
            Ok(Command::Climate {
                temperature_deci_c: -53,
                humidity_pct: 80
            })
        );
        assert_eq!(parse("log"), Ok(Command::Log(None)));
        assert_eq!(parse("log 5"), Ok(Command::Log(Some(5))));
        assert_eq!(parse("help run"), Ok(Command::Help(Some("run"))));
        assert_eq!(parse("status"), Ok(Command::Status));
    }

    #[test]
    fn rejects_unknown_keywords_and_trailing_input() {
        assert!(parse("reboot now").is_err());
        assert!(parse("status please").is_err());
        let error = parse("step 3").unwrap_err();
        assert_eq!(error.offset, 5);
    }
}
