//! CLI argument parsing for the ustrace diagnostic binary

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Upper bound for `--events`
pub const MAX_EVENTS: i64 = 1_000_000;

/// Output format for recorded events
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "ustrace")]
#[command(version)]
#[command(about = "Record simulated probe events with dynamic context fields", long_about = None)]
pub struct Cli {
    /// Context field to attach, repeatable (e.g., -c ipc_ns -c vtid); defaults to ipc_ns
    #[arg(short = 'c', long = "context", value_name = "NAME")]
    pub contexts: Vec<String>,

    /// Number of events to record (at most 1000000)
    #[arg(
        short = 'n',
        long = "events",
        value_name = "COUNT",
        default_value = "1",
        value_parser = clap::value_parser!(u32).range(0..=MAX_EVENTS)
    )]
    pub events: u32,

    /// Payload appended to every event
    #[arg(long = "payload", value_name = "TEXT", default_value = "")]
    pub payload: String,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Clock plugin library (overrides USTRACE_CLOCK_PLUGIN)
    #[arg(long = "clock-plugin", value_name = "PATH")]
    pub clock_plugin: Option<PathBuf>,

    /// Fork through the interposer and record one more event in the child
    #[arg(long = "fork")]
    pub fork: bool,

    /// List available context fields and exit
    #[arg(long = "list")]
    pub list: bool,

    /// Enable debug logging on stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Requested context names, `ipc_ns` when none were given
    pub fn context_names(&self) -> Vec<&str> {
        if self.contexts.is_empty() {
            vec!["ipc_ns"]
        } else {
            self.contexts.iter().map(String::as_str).collect()
        }
    }
}
