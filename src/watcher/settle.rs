//! Settling of bursty file events.
//!
//! A single save usually fires a create followed by several writes. Paths
//! are held here until no event has arrived for them for the settle
//! period, so a file is read only after its writer is done with it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Paths waiting for their quiet period to elapse.
#[derive(Debug)]
pub struct Settler {
    /// path -> time of the most recent event
    last_event: HashMap<PathBuf, Instant>,
    quiet: Duration,
}

impl Settler {
    pub fn new(quiet: Duration) -> Self {
        Self {
            last_event: HashMap::new(),
            quiet,
        }
    }

    /// Record an event for `path` at `at`, restarting its quiet period.
    pub fn note(&mut self, path: PathBuf, at: Instant) {
        self.last_event.insert(path, at);
    }

    /// Remove and return every path that has been quiet since `now - quiet`.
    ///
    /// Returned paths are sorted so a burst of files is emitted in a
    /// stable order.
    pub fn drain_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut settled = Vec::new();
        let quiet = self.quiet;

        self.last_event.retain(|path, last| {
            if now.saturating_duration_since(*last) >= quiet {
                settled.push(path.clone());
                false
            } else {
                true
            }
        });

        settled.sort();
        settled
    }

    pub fn is_empty(&self) -> bool {
        self.last_event.is_empty()
    }
}
