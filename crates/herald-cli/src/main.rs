//! Herald CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use herald_cli::cli::Cli;
use herald_cli::commands;

fn main() {
    // Load .env.local if it exists (for HERALD_* overrides)
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().to_string()));

    fmt().with_env_filter(filter).with_target(false).init();

    let result = commands::load_config(cli.config.as_deref())
        .and_then(|config| commands::execute(cli.command, &config));

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
