//! Durable ledger of discovered artifacts and per-destination delivery state.
//!
//! The ledger is the single source of truth for "has this been delivered".
//! Two tables back it:
//!
//! ```text
//! artifacts          path UNIQUE, fingerprint indexed, decoded metadata
//! delivery_records   (artifact_id, destination) UNIQUE, status, retries
//! ```
//!
//! Duplicate suppression lives in the schema (unique constraints with
//! `ON CONFLICT DO NOTHING`), not in callers, so repeated or concurrent
//! dispatch attempts cannot create a second record.

mod error;
mod schema;
mod store;
mod types;

pub use error::{LedgerError, LedgerResult};
pub use store::Ledger;
pub use types::{
    ActivityMetadata, Artifact, ArtifactId, DeliveryRecord, DeliveryStatus, DestinationTally,
    DiscoverySource, LedgerStats, NewArtifact,
};
