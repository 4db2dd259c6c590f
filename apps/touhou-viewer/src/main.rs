//! Touhou Engine viewer
//!
//! Opens a window and draws a spinning colored quad.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p touhou-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <PATH>`: Config file (default: `touhou.toml`; defaults are used if absent)
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::bail;
use touhou_app::{run_app, AppConfig, DEFAULT_CONFIG_FILE};

/// What the command line asked for.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run { config: PathBuf },
    Help,
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut config = PathBuf::from(DEFAULT_CONFIG_FILE);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-c" | "--config" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("{} needs a path", args[i]);
                };
                config = PathBuf::from(path);
                i += 1;
            }
            other => bail!("Unknown argument: {other}"),
        }
        i += 1;
    }
    Ok(Command::Run { config })
}

fn run(args: &[String]) -> anyhow::Result<()> {
    match parse_args(args)? {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Run { config } => run_app(AppConfig::load(&config)?),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet if config loading failed
            tracing::error!("Fatal: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    eprintln!(
        "Touhou Engine viewer

USAGE:
    cargo run -p touhou-viewer -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Config file (default: {DEFAULT_CONFIG_FILE})
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
