//! Directory monitoring with idempotent discovery.
//!
//! # Architecture
//!
//! ```text
//! notify::RecommendedWatcher ──► mpsc ──► Monitor::watch loop
//!                                            │ arrival events
//!                                            ▼
//!                                         Settler (quiet period)
//!                                            │ settled paths
//!                                            ▼
//! Monitor::scan_existing ───────────────► filter + SeenSet ──► on_new(Discovery)
//! ```
//!
//! The seen-set belongs to the monitor instance and is the only gate for
//! "report once per path per process".

mod error;
mod monitor;
mod seen;
mod settle;

pub use error::{Cancelled, WatchError};
pub use monitor::{Discovery, Monitor, OnNew, expand_home};
