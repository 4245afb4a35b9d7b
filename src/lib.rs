//! Discover activity files in local folders and deliver each one exactly
//! once to every configured destination.
//!
//! Components, leaf first:
//! - [`ledger`]: durable artifact and delivery-state store
//! - [`decoder`]: fingerprinting and the metadata decoder seam
//! - [`destination`]: the destination contract and its integrations
//! - [`dispatch`]: per-destination delivery with bounded retry
//! - [`watcher`]: directory monitoring with idempotent discovery
//! - [`pipeline`]: composition root and run modes

pub mod cli;
pub mod config;
pub mod decoder;
pub mod destination;
pub mod dispatch;
pub mod ledger;
pub mod logging;
pub mod pipeline;
pub mod watcher;

pub use config::Settings;
pub use decoder::{Decoder, FitHeaderDecoder, fingerprint};
pub use destination::{ConfigError, Destination, IntervalsDestination, PushError, Receipt};
pub use dispatch::{DeliveryError, DispatchError, Dispatcher, Outcome, RetryPolicy};
pub use ledger::{
    ActivityMetadata, Artifact, ArtifactId, DeliveryRecord, DeliveryStatus, DiscoverySource,
    Ledger, LedgerError, LedgerStats, NewArtifact,
};
pub use pipeline::{Pipeline, PipelineError, Processed, RunSummary};
pub use watcher::{Discovery, Monitor, WatchError};
