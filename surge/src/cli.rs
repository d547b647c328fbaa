use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 90s, 500ms, 5m)".to_string());
    }
    humantime::parse_duration(s)
        .map_err(|err| format!("invalid duration '{s}': {err} (expected e.g. 90s, 500ms, 5m)"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log line.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "surge",
    author,
    version,
    about = "Load generator for HTTP and message-driven services",
    long_about = "surge drives virtual users through a scripted sequence of steps and ramps their number up and down over time.\n\nA test is described in YAML: a total duration plus one or more scenarios, each with a ramp profile, pacing and a script.\n\nLog verbosity follows RUST_LOG (default: info).",
    after_help = "Examples:\n  surge run checkout.yaml\n  surge run checkout.yaml --duration 5m --seed 42\n  RUST_LOG=surge_core=debug surge run checkout.yaml --log-format json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test definition
    #[command(
        long_about = "Load a YAML test definition, prepare every scenario against the total duration and run them side by side.\n\nCtrl-C stops all scenarios; users finish their current iteration before exiting."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the test definition (.yaml)
    pub file: PathBuf,

    /// Override the definition's total duration (e.g. 90s, 5m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Seed every scenario's random generators (reproducible ids and jitter)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}
