use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to open ledger at {path}: {cause}")]
    Open { path: PathBuf, cause: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("No delivery record for artifact {artifact_id} and destination '{destination}'")]
    RecordNotFound {
        artifact_id: i64,
        destination: String,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
