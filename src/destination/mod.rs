//! Delivery destinations.
//!
//! A destination is any remote system that accepts a pushed artifact.
//! Each integration is a standalone value implementing [`Destination`];
//! the dispatcher holds them as trait objects selected at configuration
//! time.

mod intervals;

pub use intervals::{
    DEFAULT_BASE_URL as INTERVALS_DEFAULT_BASE_URL, IntervalsDestination, extract_activity_name,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ledger::Artifact;

/// Destination configuration problems, raised before any work starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{destination}: {field} is required")]
    MissingField {
        destination: String,
        field: &'static str,
    },

    #[error("{destination}: {reason}")]
    Invalid { destination: String, reason: String },
}

/// Failure of a single push attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Network trouble or a server-side hiccup. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The destination refused the artifact. Retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The destination already holds this activity.
    #[error("already delivered: {detail}")]
    Conflict {
        remote_id: Option<String>,
        detail: String,
    },

    #[error("cancelled")]
    Cancelled,
}

impl PushError {
    /// Only transient failures go back through the backoff loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PushError::Transient(_))
    }
}

/// Proof of delivery returned by a destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Identifier assigned by the destination.
    pub remote_id: Option<String>,
    /// Where the delivered activity can be found.
    pub remote_locator: Option<String>,
    /// Set when the destination reported the activity as already present.
    pub duplicate: bool,
}

impl Receipt {
    pub fn new(remote_id: Option<String>, remote_locator: Option<String>) -> Self {
        Self {
            remote_id,
            remote_locator,
            duplicate: false,
        }
    }
}

/// Capability interface implemented by every integration.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Stable name, used as the ledger key for delivery records.
    fn name(&self) -> &str;

    /// Check that the destination is usable before any work is accepted.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Send one artifact.
    ///
    /// May be called repeatedly for the same artifact. Implementations
    /// should return promptly with [`PushError::Cancelled`] once `cancel`
    /// fires.
    async fn push(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<Receipt, PushError>;
}
