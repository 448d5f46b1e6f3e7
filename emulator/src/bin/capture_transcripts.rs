use std::io;
use std::path::PathBuf;

#[allow(dead_code)]
#[path = "../commands.rs"]
mod commands;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use node_core::config::NodeConfig;
use session::{Session, SessionOptions};

const TRANSCRIPT_DIR: &str = "transcripts";

fn main() -> io::Result<()> {
    record("default-cadence", &["run 25s", "status"])?;
    record(
        "sensor-faults",
        &[
            "fault checksum",
            "run 100ms",
            "fault bus",
            "run 10s",
            "run 10s",
            "log 6",
        ],
    )?;
    record(
        "lost-wake",
        &["late 400ms", "run 1s", "run 10s", "status"],
    )?;
    record(
        "update-mode",
        &["run 5s", "update on", "run 30ms", "update off", "run 10s"],
    )?;
    record(
        "button-and-overlay",
        &[
            "run 1s",
            "press 80ms",
            "run 1s",
            "ext 421 15 3",
            "run 6s",
            "link on",
            "run 10s",
        ],
    )?;
    Ok(())
}

fn record(name: &str, script: &[&str]) -> io::Result<()> {
    let mut config = NodeConfig::new();
    config.display.show_clock = true;
    let mut session = Session::new(SessionOptions {
        config,
        transcript: Some(PathBuf::from(format!("{TRANSCRIPT_DIR}/{name}.log"))),
    })?;

    for line in script {
        session.handle_command(line)?;
    }
    Ok(())
}
