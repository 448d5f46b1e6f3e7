mod commands;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use node_core::config::NodeConfig;
use session::{Session, SessionOptions};

const USAGE: &str = "Usage: node-emulator [--transcript <path>] [--advertising <1-160>] \
[--measure <1-25>] [--display-step <10-255>] [--fahrenheit] [--battery] [--clock]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Sensor node emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options<I>(mut args: I) -> Result<SessionOptions, String>
where
    I: Iterator<Item = String>,
{
    let mut config = NodeConfig::new();
    let mut transcript = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--transcript" => {
                let value = args.next().ok_or("Expected value after --transcript")?;
                transcript = Some(PathBuf::from(value));
            }
            "--advertising" => config.advertising_interval = parse_value(&arg, args.next())?,
            "--measure" => config.measure_interval = parse_value(&arg, args.next())?,
            "--display-step" => config.display_step = parse_value(&arg, args.next())?,
            "--fahrenheit" => config.display.fahrenheit = true,
            "--battery" => config.display.show_battery = true,
            "--clock" => config.display.show_clock = true,
            other => return Err(format!("Unknown option `{other}`")),
        }
    }

    Ok(SessionOptions {
        config: config.sanitized(),
        transcript,
    })
}

fn parse_value(flag: &str, value: Option<String>) -> Result<u8, String> {
    let value = value.ok_or_else(|| format!("Expected value after {flag}"))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value `{value}` for {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|arg| (*arg).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn options_are_sanitized() {
        let options = parse_options(args(&["--measure", "99", "--clock"])).unwrap();
        assert_eq!(options.config.measure_interval, 25);
        assert!(options.config.display.show_clock);
        assert!(options.transcript.is_none());
    }

    #[test]
    fn missing_and_bad_values_are_errors() {
        assert!(parse_options(args(&["--transcript"])).is_err());
        assert!(parse_options(args(&["--advertising", "many"])).is_err());
        assert!(parse_options(args(&["--verbose"])).is_err());
    }
}
