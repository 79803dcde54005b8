//! Harvester CLI — content-acquisition pipeline runner.
//!
//! Discovers, retrieves, and indexes content sources through the priority
//! worker pool, with circuit-breaker-protected external calls.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
