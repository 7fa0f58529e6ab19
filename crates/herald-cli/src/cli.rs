//! Command-line interface definition using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Herald - priority-ordered, dependency-aware event dispatch
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to a JSON dispatch config (defaults to HERALD_* environment variables)
    #[arg(short, long, env = "HERALD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a demo scenario and print what each listener did
    Demo {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,

        /// Have a listener cancel the raise
        #[arg(long)]
        cancel: bool,

        /// Share cancellation between simultaneously raised events
        #[arg(long)]
        shared: bool,
    },

    /// Print the effective dispatch config as JSON
    Config,

    /// List the named priority bands
    Bands,
}

/// Built-in demo scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// A world save that fans out into chunk and region saves
    WorldSave,
    /// A block break and its item drop raised as one queue
    Alongside,
}

impl Cli {
    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
