//! Composition root: discovery to delivery.
//!
//! ```text
//! Monitor ─► Discovery ─► read + fingerprint ─► Ledger::exists?
//!                                                  │ no
//!                                                  ▼
//!                         decode (best effort) ─► Ledger::record_artifact
//!                                                  │
//!                                                  ▼
//!                  Ledger::create_delivery_record (one per destination)
//!                                                  │
//!                                                  ▼
//!                         Dispatcher::dispatch ─► mark_succeeded / mark_failed
//! ```

mod error;
mod processor;
mod run;

pub use error::{PipelineError, PipelineResult};
pub use processor::{DrainReport, Pipeline, Processed};
pub use run::{RunSummary, run_continuous, run_once};
