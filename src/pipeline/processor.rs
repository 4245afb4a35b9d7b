//! Discovery-to-delivery processing of single files and backlogs.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::error::{PipelineError, PipelineResult};
use crate::decoder::{Decoder, fingerprint};
use crate::dispatch::{DeliveryError, Dispatcher, Outcome};
use crate::ledger::{Artifact, ArtifactId, DiscoverySource, Ledger, NewArtifact};

/// What happened to one discovered file.
#[derive(Debug)]
pub enum Processed {
    /// First sighting: recorded and dispatched.
    New {
        artifact_id: ArtifactId,
        outcomes: Vec<Outcome>,
    },
    /// Path or content already in the ledger. Nothing was sent.
    Known,
}

impl Processed {
    pub fn outcomes(&self) -> &[Outcome] {
        match self {
            Processed::New { outcomes, .. } => outcomes,
            Processed::Known => &[],
        }
    }
}

/// Tallies from a backlog drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Left pending because shutdown interrupted them.
    pub interrupted: usize,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.interrupted
    }
}

/// Composition root tying decoder, ledger and dispatcher together.
pub struct Pipeline {
    ledger: Arc<Ledger>,
    decoder: Arc<dyn Decoder>,
    dispatcher: Arc<Dispatcher>,
}

impl Pipeline {
    pub fn new(ledger: Arc<Ledger>, decoder: Arc<dyn Decoder>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            ledger,
            decoder,
            dispatcher,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Process one discovered file.
    ///
    /// Steps: read, fingerprint, consult the ledger, decode (best effort),
    /// record with metadata, queue one record per destination, dispatch,
    /// and record each outcome as its destination finishes.
    pub async fn process(
        &self,
        path: &Path,
        source: DiscoverySource,
        cancel: &CancellationToken,
    ) -> PipelineResult<Processed> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| PipelineError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let fp = fingerprint(&bytes);

        if self.ledger.exists(path, &fp)? {
            crate::debug_event!("pipeline", "already known", "{}", path.display());
            return Ok(Processed::Known);
        }

        let metadata = match self.decoder.decode(&bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(
                    "[pipeline] decode failed for {}: {e}; recording without metadata",
                    path.display()
                );
                Default::default()
            }
        };

        let new = NewArtifact::new(path.to_path_buf(), fp, bytes.len() as u64, source)
            .with_metadata(metadata);
        let Some(artifact_id) = self.ledger.record_artifact(&new)? else {
            crate::debug_event!("pipeline", "recorded concurrently", "{}", path.display());
            return Ok(Processed::Known);
        };
        let artifact = new.into_artifact(artifact_id);

        crate::log_event!(
            "pipeline",
            "recorded",
            "{} as #{artifact_id} ({} bytes, {source})",
            path.display(),
            artifact.size
        );

        for name in self.dispatcher.destination_names() {
            self.ledger.create_delivery_record(artifact_id, &name)?;
            self.ledger.mark_attempted(artifact_id, &name)?;
        }

        // Each outcome is persisted as soon as its destination finishes.
        let mut unrecorded = None;
        let outcomes = self
            .dispatcher
            .dispatch_each(&artifact, cancel, |outcome| {
                if let Err(e) = self.record_outcome(outcome) {
                    unrecorded.get_or_insert(e);
                }
            })
            .await;
        if let Some(e) = unrecorded {
            return Err(e);
        }

        Ok(Processed::New {
            artifact_id,
            outcomes,
        })
    }

    /// Deliver every pending record, per destination, oldest activity first.
    pub async fn drain_pending(&self, cancel: &CancellationToken) -> PipelineResult<DrainReport> {
        let mut report = DrainReport::default();

        for name in self.dispatcher.destination_names() {
            let backlog = self.ledger.pending_for(&name)?;
            if backlog.is_empty() {
                continue;
            }
            crate::log_event!("pipeline", "draining", "{} pending for {name}", backlog.len());

            for artifact in backlog {
                if cancel.is_cancelled() {
                    return Ok(report);
                }
                let Some(outcome) = self.deliver_one(&name, &artifact, cancel).await? else {
                    break;
                };
                match &outcome.result {
                    Ok(_) => report.succeeded += 1,
                    Err(DeliveryError::Cancelled) => report.interrupted += 1,
                    Err(_) => report.failed += 1,
                }
            }
        }

        Ok(report)
    }

    /// Re-queue failed records under `max_retries` and drain them.
    ///
    /// Returns the number of records re-queued.
    pub async fn retry_sweep(
        &self,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> PipelineResult<usize> {
        let requeued = self.requeue_failed(max_retries)?;
        if requeued > 0 {
            self.drain_pending(cancel).await?;
        }
        Ok(requeued)
    }

    /// Startup catch-up: optionally re-queue failed records, then drain the
    /// backlog once.
    pub async fn resume(
        &self,
        sweep_max_retries: Option<u32>,
        cancel: &CancellationToken,
    ) -> PipelineResult<DrainReport> {
        if let Some(max_retries) = sweep_max_retries {
            self.requeue_failed(max_retries)?;
        }
        self.drain_pending(cancel).await
    }

    fn requeue_failed(&self, max_retries: u32) -> PipelineResult<usize> {
        let mut requeued = 0;
        for name in self.dispatcher.destination_names() {
            let count = self.ledger.reset_to_retry(&name, max_retries)?;
            if count > 0 {
                crate::log_event!("pipeline", "retry sweep", "{count} re-queued for {name}");
            }
            requeued += count;
        }
        Ok(requeued)
    }

    async fn deliver_one(
        &self,
        name: &str,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> PipelineResult<Option<Outcome>> {
        self.ledger.mark_attempted(artifact.id, name)?;
        let Some(outcome) = self.dispatcher.dispatch_to(name, artifact, cancel).await else {
            return Ok(None);
        };
        self.record_outcome(&outcome)?;
        Ok(Some(outcome))
    }

    /// Persist one outcome. Cancelled attempts stay `pending`.
    fn record_outcome(&self, outcome: &Outcome) -> PipelineResult<()> {
        let path = outcome.path.display();
        let dest = &outcome.destination;

        match &outcome.result {
            Ok(receipt) => {
                self.ledger.mark_succeeded(
                    outcome.artifact_id,
                    dest,
                    receipt.remote_id.as_deref(),
                    receipt.remote_locator.as_deref(),
                )?;
                let note = if receipt.duplicate {
                    " (already present)"
                } else {
                    ""
                };
                crate::log_event!(
                    "pipeline",
                    "delivered",
                    "{path} -> {dest} after {} attempt(s){note}",
                    outcome.attempts
                );
            }
            Err(DeliveryError::Cancelled) => {
                crate::debug_event!("pipeline", "interrupted", "{path} -> {dest} left pending");
            }
            Err(e) => {
                self.ledger
                    .mark_failed(outcome.artifact_id, dest, &e.to_string())?;
                tracing::error!(
                    "[pipeline] delivery of {path} to {dest} failed after {} attempt(s): {e}",
                    outcome.attempts
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    use std::path::PathBuf;

    use super::*;
    use crate::decoder::FitHeaderDecoder;
    use crate::destination::{ConfigError, Destination, PushError, Receipt};
    use crate::dispatch::RetryPolicy;
    use crate::ledger::{ActivityMetadata, DeliveryStatus};

    /// Destination that either accepts everything or fails transiently.
    struct Switch {
        name: &'static str,
        healthy: AtomicBool,
        calls: AtomicU32,
        delivered: Mutex<Vec<PathBuf>>,
    }

    impl Switch {
        fn new(name: &'static str, healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                healthy: AtomicBool::new(healthy),
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Destination for Switch {
        fn name(&self) -> &str {
            self.name
        }

        fn validate(&self) -> Result<(), ConfigError> {
            Ok(())
        }

        async fn push(
            &self,
            artifact: &Artifact,
            _cancel: &CancellationToken,
        ) -> Result<Receipt, PushError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                self.delivered.lock().push(artifact.path.clone());
                Ok(Receipt::new(
                    Some(format!("r{}", artifact.id)),
                    Some(format!("https://example.test/{}", artifact.id)),
                ))
            } else {
                Err(PushError::Transient("503 Service Unavailable".to_string()))
            }
        }
    }

    fn pipeline(switches: &[Arc<Switch>]) -> Pipeline {
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(2));
        pipeline_with(switches, policy)
    }

    fn pipeline_with(switches: &[Arc<Switch>], policy: RetryPolicy) -> Pipeline {
        let destinations = switches
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn Destination>)
            .collect();
        Pipeline::new(
            Arc::new(Ledger::in_memory().unwrap()),
            Arc::new(FitHeaderDecoder),
            Arc::new(Dispatcher::new(destinations, policy).unwrap()),
        )
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn test_new_file_is_recorded_and_delivered() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "activity.fit", b"not really a fit file");
        let a = Switch::new("A", true);
        let b = Switch::new("B", true);
        let pipeline = pipeline(&[a.clone(), b.clone()]);
        let cancel = CancellationToken::new();

        let processed = pipeline
            .process(&path, DiscoverySource::Watch, &cancel)
            .await
            .unwrap();
        let Processed::New {
            artifact_id,
            outcomes,
        } = processed
        else {
            panic!("expected a new artifact");
        };
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(Outcome::is_success));

        let ledger = pipeline.ledger();
        let artifact = ledger.find_by_id(artifact_id).unwrap().unwrap();
        assert_eq!(artifact.path, path);
        assert_eq!(artifact.size, 21);
        assert!(artifact.metadata.is_empty());

        let records = ledger.deliveries_for(artifact_id).unwrap();
        assert_eq!(records.len(), 2);
        for record in records {
            assert_eq!(record.status, DeliveryStatus::Succeeded);
            assert_eq!(record.remote_id, Some(format!("r{artifact_id}")));
            assert!(record.attempted_at.is_some());
            assert!(record.completed_at.is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fast_delivery_is_durable_while_another_retries() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ride.fit", b"ride");
        let fast = Switch::new("fast", true);
        let slow = Switch::new("slow", false);
        // Slow backs off for at least 200 + 400 + 800 ms.
        let policy = RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(5));
        let pipeline = Arc::new(pipeline_with(&[fast.clone(), slow.clone()], policy));
        let cancel = CancellationToken::new();

        let handle = {
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            let path = path.clone();
            tokio::spawn(async move {
                pipeline
                    .process(&path, DiscoverySource::Watch, &cancel)
                    .await
            })
        };

        let ledger = pipeline.ledger();
        let status = |name: &str| {
            ledger
                .find_by_path(&path)
                .unwrap()
                .and_then(|a| ledger.delivery_record(a.id, name).unwrap())
                .map(|r| r.status)
        };
        for _ in 0..50 {
            if status("fast") == Some(DeliveryStatus::Succeeded) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(status("fast"), Some(DeliveryStatus::Succeeded));
        assert_eq!(status("slow"), Some(DeliveryStatus::Pending));
        assert!(!handle.is_finished());

        // Shutdown mid-backoff leaves the slow record pending.
        cancel.cancel();
        let processed = handle.await.unwrap().unwrap();
        assert_eq!(processed.outcomes().len(), 2);
        assert_eq!(status("slow"), Some(DeliveryStatus::Pending));
        assert_eq!(fast.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_known_path_and_copied_content_are_skipped() {
        let dir = TempDir::new().unwrap();
        let original = write(&dir, "ride.fit", b"same bytes");
        let copy = write(&dir, "ride-copy.fit", b"same bytes");
        let dest = Switch::new("A", true);
        let pipeline = pipeline(&[dest.clone()]);
        let cancel = CancellationToken::new();

        let first = pipeline
            .process(&original, DiscoverySource::Scan, &cancel)
            .await
            .unwrap();
        assert!(matches!(first, Processed::New { .. }));

        for path in [&original, &copy] {
            let again = pipeline
                .process(path, DiscoverySource::Watch, &cancel)
                .await
                .unwrap();
            assert!(matches!(again, Processed::Known));
        }

        assert_eq!(dest.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.ledger().stats().unwrap().total_artifacts, 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_an_error() {
        let pipeline = pipeline(&[Switch::new("A", true)]);
        let err = pipeline
            .process(
                Path::new("/definitely/missing.fit"),
                DiscoverySource::Watch,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Read { .. }));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_recorded_then_swept() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ride.fit", b"ride");
        let flaky = Switch::new("A", false);
        let healthy = Switch::new("B", true);
        let pipeline = pipeline(&[flaky.clone(), healthy.clone()]);
        let cancel = CancellationToken::new();

        let processed = pipeline
            .process(&path, DiscoverySource::Watch, &cancel)
            .await
            .unwrap();
        let Processed::New { artifact_id, .. } = processed else {
            panic!("expected a new artifact");
        };

        let ledger = pipeline.ledger();
        let a = ledger.delivery_record(artifact_id, "A").unwrap().unwrap();
        assert_eq!(a.status, DeliveryStatus::Failed);
        assert_eq!(a.retries, 1);
        assert!(a.error.as_deref().unwrap().contains("503"));
        let b = ledger.delivery_record(artifact_id, "B").unwrap().unwrap();
        assert_eq!(b.status, DeliveryStatus::Succeeded);

        flaky.healthy.store(true, Ordering::SeqCst);
        let requeued = pipeline.retry_sweep(5, &cancel).await.unwrap();
        assert_eq!(requeued, 1);

        let a = ledger.delivery_record(artifact_id, "A").unwrap().unwrap();
        assert_eq!(a.status, DeliveryStatus::Succeeded);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_respects_ceiling() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ride.fit", b"ride");
        let flaky = Switch::new("A", false);
        let pipeline = pipeline(&[flaky.clone()]);
        let cancel = CancellationToken::new();

        pipeline
            .process(&path, DiscoverySource::Watch, &cancel)
            .await
            .unwrap();
        assert_eq!(pipeline.retry_sweep(2, &cancel).await.unwrap(), 1);
        // Two recorded failures now; a ceiling of 2 excludes the record.
        assert_eq!(pipeline.retry_sweep(2, &cancel).await.unwrap(), 0);
        assert_eq!(pipeline.ledger().stats().unwrap().by_destination["A"].failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_delivery_stays_pending_until_drained() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ride.fit", b"ride");
        let dest = Switch::new("A", true);
        let pipeline = pipeline(&[dest.clone()]);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let processed = pipeline
            .process(&path, DiscoverySource::Watch, &cancelled)
            .await
            .unwrap();
        let Processed::New { artifact_id, .. } = processed else {
            panic!("expected a new artifact");
        };
        let record = pipeline
            .ledger()
            .delivery_record(artifact_id, "A")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.retries, 0);

        let report = pipeline
            .drain_pending(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(dest.delivered.lock().as_slice(), &[path]);
    }

    #[tokio::test]
    async fn test_resume_delivers_failed_and_pending_once() {
        let dir = TempDir::new().unwrap();
        let failed = write(&dir, "failed.fit", b"failed ride");
        let pending = write(&dir, "pending.fit", b"pending ride");
        let dest = Switch::new("A", false);
        let pipeline = pipeline(&[dest.clone()]);

        pipeline
            .process(&failed, DiscoverySource::Scan, &CancellationToken::new())
            .await
            .unwrap();
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        pipeline
            .process(&pending, DiscoverySource::Scan, &cancelled)
            .await
            .unwrap();

        let stats = pipeline.ledger().stats().unwrap();
        let tallies = &stats.by_destination["A"];
        assert_eq!((tallies.failed, tallies.pending), (1, 1));

        dest.healthy.store(true, Ordering::SeqCst);
        let calls_before = dest.calls.load(Ordering::SeqCst);
        let report = pipeline
            .resume(Some(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.attempted(), 2);
        assert_eq!(dest.calls.load(Ordering::SeqCst) - calls_before, 2);
        assert_eq!(pipeline.ledger().stats().unwrap().by_destination["A"].succeeded, 2);
    }

    #[tokio::test]
    async fn test_resume_without_sweep_leaves_failures() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ride.fit", b"ride");
        let dest = Switch::new("A", false);
        let pipeline = pipeline(&[dest.clone()]);
        pipeline
            .process(&path, DiscoverySource::Scan, &CancellationToken::new())
            .await
            .unwrap();

        dest.healthy.store(true, Ordering::SeqCst);
        let report = pipeline
            .resume(None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.attempted(), 0);
        assert_eq!(pipeline.ledger().stats().unwrap().by_destination["A"].failed, 1);
    }

    #[tokio::test]
    async fn test_drain_is_chronological() {
        let dest = Switch::new("A", true);
        let pipeline = pipeline(&[dest.clone()]);
        let ledger = pipeline.ledger();

        let rides = [
            ("late.fit", 2024, 6),
            ("early.fit", 2023, 1),
            ("middle.fit", 2024, 1),
        ];
        for (name, year, month) in rides {
            let metadata = ActivityMetadata {
                started_at: Utc.with_ymd_and_hms(year, month, 1, 8, 0, 0).single(),
                ..Default::default()
            };
            let new = NewArtifact::new(
                PathBuf::from(format!("/rides/{name}")),
                name.to_string(),
                1,
                DiscoverySource::Scan,
            )
            .with_metadata(metadata);
            let id = ledger.record_artifact(&new).unwrap().unwrap();
            ledger.create_delivery_record(id, "A").unwrap();
        }

        let report = pipeline
            .drain_pending(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.attempted(), 3);
        assert_eq!(
            dest.delivered.lock().as_slice(),
            &[
                PathBuf::from("/rides/early.fit"),
                PathBuf::from("/rides/middle.fit"),
                PathBuf::from("/rides/late.fit"),
            ]
        );
        assert!(ledger.pending_for("A").unwrap().is_empty());
    }
}
