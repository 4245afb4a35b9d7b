//! Per-instance record of paths already reported.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Absolute paths reported by one monitor during this process lifetime.
///
/// Shared by the scan and live-watch paths, which may run concurrently.
#[derive(Debug, Default)]
pub struct SeenSet {
    paths: Mutex<HashSet<PathBuf>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` seen. Returns `true` only for the first caller.
    pub fn mark(&self, path: &Path) -> bool {
        let mut paths = self.paths.lock();
        if paths.contains(path) {
            return false;
        }
        paths.insert(path.to_path_buf())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }
}
