//! Fan-out of one artifact to every registered destination.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::backoff::{RetryPolicy, sleep_or_cancel};
use super::error::{DeliveryError, DispatchError};
use crate::destination::{Destination, PushError, Receipt};
use crate::ledger::{Artifact, ArtifactId};

/// Result of delivering one artifact to one destination.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub destination: String,
    pub artifact_id: ArtifactId,
    pub path: PathBuf,
    /// Push attempts made, including the first.
    pub attempts: u32,
    pub result: Result<Receipt, DeliveryError>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(DeliveryError::Cancelled))
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        self.result.as_ref().err()
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        self.result.as_ref().ok()
    }
}

/// Delivers artifacts to a fixed set of validated destinations.
pub struct Dispatcher {
    destinations: Vec<Arc<dyn Destination>>,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// Build a dispatcher, refusing to start if any destination is
    /// misconfigured or two destinations share a name.
    pub fn new(
        destinations: Vec<Arc<dyn Destination>>,
        policy: RetryPolicy,
    ) -> Result<Self, DispatchError> {
        let mut names = HashSet::new();
        for destination in &destinations {
            destination.validate()?;
            if !names.insert(destination.name().to_string()) {
                return Err(DispatchError::DuplicateName(destination.name().to_string()));
            }
        }

        crate::debug_event!(
            "dispatch",
            "ready",
            "{} destination(s), max {} retries",
            destinations.len(),
            policy.max_retries
        );

        Ok(Self {
            destinations,
            policy,
        })
    }

    /// Destination names in registration order.
    pub fn destination_names(&self) -> Vec<String> {
        self.destinations
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Deliver to every destination concurrently.
    ///
    /// Outcomes are returned in registration order, one per destination.
    pub async fn dispatch(&self, artifact: &Artifact, cancel: &CancellationToken) -> Vec<Outcome> {
        self.dispatch_each(artifact, cancel, |_| {}).await
    }

    /// Like [`dispatch`](Self::dispatch), calling `on_outcome` as soon as
    /// each destination finishes rather than after the slowest one.
    pub async fn dispatch_each<F>(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
        mut on_outcome: F,
    ) -> Vec<Outcome>
    where
        F: FnMut(&Outcome),
    {
        let mut tasks = JoinSet::new();
        for (index, destination) in self.destinations.iter().enumerate() {
            let destination = Arc::clone(destination);
            let artifact = artifact.clone();
            let cancel = cancel.clone();
            let policy = self.policy;
            tasks.spawn(async move {
                let outcome =
                    push_with_retry(destination.as_ref(), &artifact, &policy, &cancel).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Outcome>> = vec![None; self.destinations.len()];
        let mut aborted = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    on_outcome(&outcome);
                    slots[index] = Some(outcome);
                }
                Err(e) => {
                    tracing::error!("[dispatch] delivery task failed: {e}");
                    aborted.get_or_insert_with(|| e.to_string());
                }
            }
        }

        slots
            .into_iter()
            .zip(&self.destinations)
            .map(|(slot, destination)| {
                slot.unwrap_or_else(|| {
                    let outcome = Outcome {
                        destination: destination.name().to_string(),
                        artifact_id: artifact.id,
                        path: artifact.path.clone(),
                        attempts: 0,
                        result: Err(DeliveryError::Aborted(
                            aborted.clone().unwrap_or_default(),
                        )),
                    };
                    on_outcome(&outcome);
                    outcome
                })
            })
            .collect()
    }

    /// Deliver to a single named destination. `None` if it is not registered.
    pub async fn dispatch_to(
        &self,
        name: &str,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Option<Outcome> {
        let destination = self.destinations.iter().find(|d| d.name() == name)?;
        Some(push_with_retry(destination.as_ref(), artifact, &self.policy, cancel).await)
    }
}

/// Push with bounded exponential backoff.
///
/// Only transient failures are retried. A conflict counts as delivered.
/// Cancellation during a push or a backoff wait ends the loop at once.
pub async fn push_with_retry(
    destination: &dyn Destination,
    artifact: &Artifact,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Outcome {
    let name = destination.name();
    let mut attempts = 0u32;

    let result = loop {
        if cancel.is_cancelled() {
            break Err(DeliveryError::Cancelled);
        }

        attempts += 1;
        match destination.push(artifact, cancel).await {
            Ok(receipt) => break Ok(receipt),
            Err(PushError::Conflict { remote_id, detail }) => {
                crate::debug_event!("dispatch", "already present", "{name}: {detail}");
                break Ok(Receipt {
                    remote_id,
                    remote_locator: None,
                    duplicate: true,
                });
            }
            Err(PushError::Cancelled) => break Err(DeliveryError::Cancelled),
            Err(PushError::Rejected(reason)) => break Err(DeliveryError::Rejected(reason)),
            Err(PushError::Transient(reason)) => {
                if attempts > policy.max_retries {
                    break Err(DeliveryError::Exhausted {
                        attempts,
                        last: reason,
                    });
                }

                let delay = policy.delay_for(attempts - 1);
                tracing::warn!(
                    "[dispatch] {name} attempt {attempts}/{} failed for {}: {reason}; retrying in {delay:?}",
                    policy.max_attempts(),
                    artifact.path.display()
                );

                if !sleep_or_cancel(delay, cancel).await {
                    break Err(DeliveryError::Cancelled);
                }
            }
        }
    };

    Outcome {
        destination: name.to_string(),
        artifact_id: artifact.id,
        path: artifact.path.clone(),
        attempts,
        result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::destination::ConfigError;
    use crate::ledger::{ActivityMetadata, DiscoverySource};

    /// Scripted destination: fails the first `failures` pushes with the
    /// given error, then succeeds.
    struct Scripted {
        name: String,
        failures: u32,
        error: PushError,
        valid: bool,
        calls: AtomicU32,
        seen_at: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(name: &str, failures: u32, error: PushError) -> Self {
            Self {
                name: name.to_string(),
                failures,
                error,
                valid: true,
                calls: AtomicU32::new(0),
                seen_at: Mutex::new(Vec::new()),
            }
        }

        fn always_ok(name: &str) -> Self {
            Self::new(name, 0, PushError::Transient(String::new()))
        }

        fn always_failing(name: &str) -> Self {
            Self::new(name, u32::MAX, PushError::Transient("503".to_string()))
        }
    }

    #[async_trait]
    impl Destination for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn validate(&self) -> Result<(), ConfigError> {
            if self.valid {
                Ok(())
            } else {
                Err(ConfigError::MissingField {
                    destination: self.name.clone(),
                    field: "api_key",
                })
            }
        }

        async fn push(
            &self,
            _artifact: &Artifact,
            _cancel: &CancellationToken,
        ) -> Result<Receipt, PushError> {
            self.seen_at.lock().push(Instant::now());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(Receipt::new(Some(format!("{}-{call}", self.name)), None))
            }
        }
    }

    fn artifact() -> Artifact {
        Artifact {
            id: ArtifactId::new(1),
            path: PathBuf::from("/rides/activity.fit"),
            fingerprint: "abc".to_string(),
            size: 3,
            discovered_at: Utc::now(),
            source: DiscoverySource::Watch,
            metadata: ActivityMetadata::default(),
        }
    }

    fn dispatcher(destinations: Vec<Arc<dyn Destination>>) -> Dispatcher {
        Dispatcher::new(destinations, RetryPolicy::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence() {
        let dest = Arc::new(Scripted::always_failing("A"));
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();

        let outcome = push_with_retry(dest.as_ref(), &artifact(), &policy, &cancel).await;

        assert_eq!(outcome.attempts, 4);
        assert!(matches!(
            outcome.result,
            Err(DeliveryError::Exhausted { attempts: 4, .. })
        ));

        let seen = dest.seen_at.lock();
        let gaps: Vec<u64> = seen
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect();
        assert_eq!(gaps, vec![1, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let dest = Arc::new(Scripted::new(
            "A",
            2,
            PushError::Transient("timeout".to_string()),
        ));
        let outcome = push_with_retry(
            dest.as_ref(),
            &artifact(),
            &RetryPolicy::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.receipt().unwrap().remote_id.as_deref(), Some("A-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_destination_does_not_affect_others() {
        let a = Arc::new(Scripted::always_failing("A"));
        let b = Arc::new(Scripted::always_ok("B"));
        let dispatcher = dispatcher(vec![a.clone() as Arc<dyn Destination>, b.clone()]);

        let outcomes = dispatcher
            .dispatch(&artifact(), &CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].destination, "A");
        assert!(!outcomes[0].is_success());
        assert_eq!(outcomes[1].destination, "B");
        assert!(outcomes[1].is_success());
        assert_eq!(outcomes[1].attempts, 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_reported_as_each_destination_finishes() {
        let slow = Arc::new(Scripted::new(
            "slow",
            2,
            PushError::Transient("timeout".to_string()),
        ));
        let fast = Arc::new(Scripted::always_ok("fast"));
        let dispatcher = dispatcher(vec![slow.clone() as Arc<dyn Destination>, fast.clone()]);
        let start = Instant::now();

        let mut finished = Vec::new();
        let outcomes = dispatcher
            .dispatch_each(&artifact(), &CancellationToken::new(), |outcome| {
                finished.push((outcome.destination.clone(), start.elapsed().as_secs()));
            })
            .await;

        assert_eq!(finished, vec![("fast".to_string(), 0), ("slow".to_string(), 3)]);
        assert_eq!(outcomes[0].destination, "slow");
        assert_eq!(outcomes[1].destination, "fast");
        assert!(outcomes.iter().all(Outcome::is_success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let dest = Arc::new(Scripted::new(
            "A",
            u32::MAX,
            PushError::Rejected("401".to_string()),
        ));
        let outcome = push_with_retry(
            dest.as_ref(),
            &artifact(),
            &RetryPolicy::default(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(DeliveryError::Rejected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_counts_as_delivered() {
        let dest = Arc::new(Scripted::new(
            "A",
            u32::MAX,
            PushError::Conflict {
                remote_id: Some("i9".to_string()),
                detail: "exists".to_string(),
            },
        ));
        let outcome = push_with_retry(
            dest.as_ref(),
            &artifact(),
            &RetryPolicy::default(),
            &CancellationToken::new(),
        )
        .await;

        let receipt = outcome.receipt().unwrap();
        assert!(receipt.duplicate);
        assert_eq!(receipt.remote_id.as_deref(), Some("i9"));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let dest = Arc::new(Scripted::always_failing("A"));
        let policy = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = push_with_retry(dest.as_ref(), &artifact(), &policy, &cancel).await;

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let dest = Arc::new(Scripted::always_ok("A"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome =
            push_with_retry(dest.as_ref(), &artifact(), &RetryPolicy::default(), &cancel).await;
        assert!(outcome.is_cancelled());
        assert_eq!(dest.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validation_gate() {
        let mut bad = Scripted::always_ok("B");
        bad.valid = false;
        let result = Dispatcher::new(
            vec![
                Arc::new(Scripted::always_ok("A")) as Arc<dyn Destination>,
                Arc::new(bad),
            ],
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(DispatchError::Invalid(_))));

        let result = Dispatcher::new(
            vec![
                Arc::new(Scripted::always_ok("A")) as Arc<dyn Destination>,
                Arc::new(Scripted::always_ok("A")),
            ],
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(DispatchError::DuplicateName(ref n)) if n == "A"));
    }

    #[tokio::test]
    async fn test_dispatch_to_named_destination() {
        let a = Arc::new(Scripted::always_ok("A"));
        let b = Arc::new(Scripted::always_ok("B"));
        let dispatcher = dispatcher(vec![a.clone() as Arc<dyn Destination>, b.clone()]);
        let cancel = CancellationToken::new();

        let outcome = dispatcher.dispatch_to("B", &artifact(), &cancel).await;
        assert!(outcome.unwrap().is_success());
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.dispatch_to("C", &artifact(), &cancel).await.is_none());
        assert_eq!(dispatcher.destination_names(), vec!["A", "B"]);
    }
}
