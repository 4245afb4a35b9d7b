use std::path::Path;

use anyhow::Context;
use clap::Parser;
use fitwatch::cli::commands::{init, retry, run, stats};
use fitwatch::cli::{Cli, Commands};
use fitwatch::config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Settings::default_config_path);
    let command = cli.effective_command();

    if let Commands::Init { force } = command {
        return init::run_init(&config_path, force);
    }

    let settings = load_settings(&config_path)?;
    let mut logging = settings.logging.clone();
    if cli.verbose {
        logging.default = "debug".to_string();
    }
    fitwatch::logging::init_with_config(&logging);

    match command {
        Commands::Run { once } => run::run(&settings, once).await,
        Commands::Config => init::run_config(&settings),
        Commands::Stats { recent } => stats::run_stats(&settings, recent),
        Commands::Retry { max_retries } => retry::run_retry(&settings, max_retries).await,
        Commands::Init { .. } => Ok(()),
    }
}

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    Settings::load_or_create(path)
        .with_context(|| format!("loading configuration from {}", path.display()))
}
