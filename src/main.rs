use anyhow::{Context, Result};
use clap::Parser;
use scrollwork::cli::{handle_command, Cli};
use scrollwork::config::Config;
use scrollwork::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())
        .with_context(|| "Failed to load configuration")?;

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    init_logging(level)?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    handle_command(cli.command, &config, cli.config.as_deref()).await
}
