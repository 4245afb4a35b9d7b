//! Init and Config commands.

use std::path::Path;

use anyhow::{Context, bail};

use crate::config::Settings;

/// Write a default configuration file.
pub fn run_init(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        bail!(
            "configuration file already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    Settings::default()
        .save(config_path)
        .with_context(|| format!("writing {}", config_path.display()))?;

    println!("Created configuration file at: {}", config_path.display());
    println!("Edit this file to enable destinations and watch folders.");
    Ok(())
}

/// Print the effective configuration.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config).context("rendering configuration")?;
    println!("# ledger: {}", config.store_path().display());
    println!("{rendered}");
    Ok(())
}
