//! Directory monitor reporting each new activity file once.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{Cancelled, WatchError};
use super::seen::SeenSet;
use super::settle::Settler;
use crate::config::WatchConfig;
use crate::ledger::DiscoverySource;

/// How often settled paths are flushed.
const TICK: Duration = Duration::from_millis(100);

/// A path reported for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub path: PathBuf,
    pub source: DiscoverySource,
}

/// Callback invoked once per newly observed path.
pub type OnNew<'a> = dyn Fn(Discovery) + Send + Sync + 'a;

/// Watches a fixed set of root directories for files with one extension.
pub struct Monitor {
    roots: Vec<PathBuf>,
    extension: String,
    settle: Duration,
    seen: SeenSet,
}

impl Monitor {
    /// Create a monitor. Roots are home-expanded and canonicalized when
    /// they exist; the extension is matched case-insensitively.
    pub fn new<I, P>(roots: I, extension: &str, settle: Duration) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|root| resolve_root(root.as_ref()))
            .collect();

        Self {
            roots,
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            settle,
            seen: SeenSet::new(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(&config.dirs, &config.extension, config.settle())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Number of distinct paths reported so far.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// List every root once (non-recursive) and report unseen candidates.
    ///
    /// A missing root is a warning. Any other listing failure is returned
    /// after the remaining roots have been scanned.
    pub fn scan_existing(&self, on_new: &OnNew<'_>) -> Result<usize, WatchError> {
        let mut found = 0;
        let mut first_error = None;

        for root in &self.roots {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!("[watcher] directory does not exist: {}", root.display());
                    continue;
                }
                Err(e) => {
                    tracing::warn!("[watcher] cannot list {}: {e}", root.display());
                    first_error.get_or_insert(WatchError::ScanFailed {
                        path: root.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("[watcher] skipping entry in {}: {e}", root.display());
                        continue;
                    }
                };
                if self.report(entry.path(), DiscoverySource::Scan, on_new) {
                    found += 1;
                }
            }
        }

        crate::debug_event!("watcher", "scan complete", "{found} new file(s)");

        match first_error {
            Some(e) => Err(e),
            None => Ok(found),
        }
    }

    /// Watch all roots until `cancel` fires.
    ///
    /// Roots that cannot be watched are logged and skipped. Errors on the
    /// event stream are logged and do not stop the loop.
    pub async fn watch(
        &self,
        on_new: &OnNew<'_>,
        cancel: &CancellationToken,
    ) -> Result<Cancelled, WatchError> {
        let (tx, mut rx) = mpsc::channel(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        let mut watching = 0;
        for root in &self.roots {
            match watcher.watch(root, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    watching += 1;
                    crate::debug_event!("watcher", "watching", "{}", root.display());
                }
                Err(e) => {
                    tracing::warn!("[watcher] failed to watch {}: {e}", root.display());
                }
            }
        }

        if watching == 0 {
            tracing::warn!("[watcher] no watchable directories; waiting for shutdown");
        } else {
            crate::log_event!("watcher", "started", "{watching} directories");
        }

        let mut settler = Settler::new(self.settle);
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::log_event!("watcher", "stopped");
                    return Ok(Cancelled);
                }

                event = rx.recv() => match event {
                    Some(Ok(event)) => self.note_event(&mut settler, event),
                    Some(Err(e)) => tracing::error!("[watcher] file watch error: {e}"),
                    None => return Err(WatchError::ChannelClosed),
                },

                _ = tick.tick(), if !settler.is_empty() => {
                    for path in settler.drain_settled(Instant::now()) {
                        self.report(path, DiscoverySource::Watch, on_new);
                    }
                }
            }
        }
    }

    fn note_event(&self, settler: &mut Settler, event: Event) {
        if !is_arrival(&event.kind) {
            return;
        }
        let now = Instant::now();
        for path in event.paths {
            if self.has_extension(&path) && !self.seen.contains(&path) {
                crate::debug_event!("watcher", "event", "{:?} {}", event.kind, path.display());
                settler.note(path, now);
            }
        }
    }

    /// Apply the filter and invoke the callback at most once per path.
    fn report(&self, path: PathBuf, source: DiscoverySource, on_new: &OnNew<'_>) -> bool {
        if !self.is_candidate(&path) || !self.seen.mark(&path) {
            return false;
        }
        crate::log_event!("watcher", "new file", "{} ({source})", path.display());
        on_new(Discovery { path, source });
        true
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Existing non-directory with the configured extension.
    fn is_candidate(&self, path: &Path) -> bool {
        self.has_extension(path)
            && std::fs::metadata(path)
                .map(|meta| !meta.is_dir())
                .unwrap_or(false)
    }
}

/// Event kinds that may signal a new or freshly written file.
fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(
                RenameMode::To | RenameMode::Both | RenameMode::Any
            ))
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Replace a leading `~` with the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Home-expand, make absolute, and canonicalize when the root exists.
fn resolve_root(root: &Path) -> PathBuf {
    let expanded = expand_home(root);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    };
    absolute.canonicalize().unwrap_or(absolute)
}
