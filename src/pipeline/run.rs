//! Run modes: one-shot catch-up and continuous watching.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::PipelineResult;
use super::processor::{Pipeline, Processed};
use crate::watcher::{Discovery, Monitor, OnNew};

/// Counts from a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Paths handed over by the monitor.
    pub discovered: usize,
    /// Paths recorded as new artifacts.
    pub recorded: usize,
    /// Paths skipped because they were already in the ledger.
    pub known: usize,
    /// Paths that could not be processed.
    pub errors: usize,
}

impl RunSummary {
    fn add(&mut self, result: PipelineResult<Processed>, discovery: &Discovery) {
        self.discovered += 1;
        match result {
            Ok(Processed::New { .. }) => self.recorded += 1,
            Ok(Processed::Known) => self.known += 1,
            Err(e) => {
                self.errors += 1;
                tracing::error!("[pipeline] {}: {e}", discovery.path.display());
            }
        }
    }
}

/// Scan every root once, process what was found, and return.
///
/// A scan failure is logged; whatever was listed is still processed.
pub async fn run_once(
    pipeline: &Pipeline,
    monitor: &Monitor,
    cancel: &CancellationToken,
) -> PipelineResult<RunSummary> {
    let found = Mutex::new(Vec::new());
    let collect = |d: Discovery| found.lock().push(d);
    if let Err(e) = monitor.scan_existing(&collect) {
        tracing::warn!("[pipeline] scan incomplete: {e}");
    }

    let mut summary = RunSummary::default();
    for discovery in found.into_inner() {
        if cancel.is_cancelled() {
            break;
        }
        let result = pipeline
            .process(&discovery.path, discovery.source, cancel)
            .await;
        summary.add(result, &discovery);
    }

    crate::log_event!(
        "run",
        "scan finished",
        "{} found, {} new, {} known",
        summary.discovered,
        summary.recorded,
        summary.known
    );
    Ok(summary)
}

/// Scan existing files, then watch until `cancel` fires.
///
/// Discoveries flow through a channel to a single processing task, so a
/// slow delivery never stalls the watch loop. Returns once both the
/// watcher and the processing task have stopped.
pub async fn run_continuous(
    pipeline: Arc<Pipeline>,
    monitor: Arc<Monitor>,
    cancel: CancellationToken,
) -> PipelineResult<RunSummary> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Discovery>();
    let on_new: Arc<OnNew<'static>> = Arc::new(move |d: Discovery| {
        if tx.send(d).is_err() {
            tracing::warn!("[pipeline] processing task stopped; discovery dropped");
        }
    });

    let worker = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut summary = RunSummary::default();
            loop {
                let discovery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(discovery) => discovery,
                        None => break,
                    },
                };
                let result = pipeline
                    .process(&discovery.path, discovery.source, &cancel)
                    .await;
                summary.add(result, &discovery);
            }
            summary
        })
    };

    match monitor.scan_existing(on_new.as_ref()) {
        Ok(count) => crate::log_event!("run", "startup scan", "{count} new file(s)"),
        Err(e) => tracing::warn!("[run] startup scan failed: {e}; watching anyway"),
    }

    let watched = monitor.watch(on_new.as_ref(), &cancel).await;
    drop(on_new);
    if watched.is_err() {
        cancel.cancel();
    }

    let summary = worker.await.unwrap_or_else(|e| {
        tracing::error!("[run] processing task failed: {e}");
        RunSummary::default()
    });
    watched?;
    Ok(summary)
}
