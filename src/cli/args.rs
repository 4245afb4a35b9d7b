//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch activity folders and deliver new files
#[derive(Parser, Debug)]
#[command(
    name = "fitwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch activity folders and deliver new files to remote destinations",
    long_about = "Discovers FIT files in local activity folders and uploads each one \
                  exactly once to every enabled destination.",
    styles = clap_cargo_style(),
    after_help = "Run without a command to start watching."
)]
pub struct Cli {
    /// Path to config file (default: ~/.fitwatch/config.toml)
    #[arg(short, long, global = true, env = "FITWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Scan, deliver and keep watching (default)
    Run {
        /// Scan existing files, deliver them, and exit
        #[arg(long)]
        once: bool,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Config,

    /// Show ledger statistics
    Stats {
        /// Recent artifacts to list
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },

    /// Re-queue failed deliveries and try them again
    Retry {
        /// Skip records that have failed this many times (overrides config)
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

impl Cli {
    /// The subcommand to run, `run` when none was given.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Run { once: false })
    }
}
