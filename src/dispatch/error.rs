//! Dispatcher error types.

use thiserror::Error;

use crate::destination::ConfigError;

/// Startup failure: the dispatcher refuses to accept work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("destination failed validation: {0}")]
    Invalid(#[from] ConfigError),

    #[error("destination '{0}' registered twice")]
    DuplicateName(String),
}

/// Why delivery of one artifact to one destination did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("rejected: {0}")]
    Rejected(String),

    /// Shutdown interrupted the attempt. Never recorded as a failure.
    #[error("cancelled")]
    Cancelled,

    #[error("delivery task aborted: {0}")]
    Aborted(String),
}
