//! Command implementations for the CLI.

pub mod init;
pub mod retry;
pub mod run;
pub mod setup;
pub mod stats;
