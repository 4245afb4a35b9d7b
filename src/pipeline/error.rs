//! Pipeline error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::watcher::WatchError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
