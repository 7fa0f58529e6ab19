//! Command handlers for CLI subcommands.

use std::path::Path;

use herald_events::{DispatchConfig, PriorityBand};
use tracing::info;

use crate::cli::{Commands, Scenario};
use crate::scenarios;

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Loads the dispatch config from `path`, or from the environment.
pub fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading dispatch config");
            Ok(DispatchConfig::from_file(path)?)
        }
        None => Ok(DispatchConfig::from_env()?),
    }
}

/// Execute a CLI command.
pub fn execute(command: Commands, config: &DispatchConfig) -> Result<()> {
    match command {
        Commands::Demo {
            scenario,
            cancel,
            shared,
        } => cmd_demo(config, scenario, cancel, shared),
        Commands::Config => cmd_config(config),
        Commands::Bands => cmd_bands(),
    }
}

fn cmd_demo(config: &DispatchConfig, scenario: Scenario, cancel: bool, shared: bool) -> Result<()> {
    let lines = match scenario {
        Scenario::WorldSave => scenarios::world_save(config, cancel)?,
        Scenario::Alongside => scenarios::alongside(config, cancel, shared)?,
    };
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_config(config: &DispatchConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn cmd_bands() -> Result<()> {
    for band in PriorityBand::all() {
        println!("{:<10} {:>6}", format!("{:?}", band), band.as_value());
    }
    Ok(())
}
