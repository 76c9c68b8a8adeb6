mod cli;
mod commands;
mod logging;
mod output;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use grc_policy::EngineConfig;
use output::print_error;

#[tokio::main]
async fn main() {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let mut config = EngineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(policy) = &cli.policy {
        config.store.path = policy.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;

    logging::init(&config.logging);
    tracing::debug!(policy = %config.store.path.display(), "Configuration loaded");

    match &cli.command {
        Commands::Validate => commands::validate::run(&config, format).await?,
        Commands::Evaluate(args) => commands::evaluate::run(&config, args, format).await?,
        Commands::Show(args) => commands::show::run(&config, args, format).await?,
        Commands::Watch => commands::watch::run(&config).await?,
    }

    Ok(())
}
