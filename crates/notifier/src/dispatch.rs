//! Fan-out scheduler.
//!
//! A producer task feeds workers into a bounded channel; the consumer loop
//! launches one task per worker once a concurrency permit is available, then
//! waits for every task (retries included) before returning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{self, JoinError, JoinSet};
use uuid::Uuid;

use herald_common::types::{DeliveryReport, DeliveryStatus, DispatchReport, Transport};

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::error::PushError;
use crate::retry::retry_counted;
use crate::worker::{AttemptState, Worker};

/// Default cap on deliveries in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

/// Default capacity of the producer → consumer channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Upper bound on concurrently running deliveries, shared by every dispatch
    /// made through the same [`Dispatcher`].
    pub max_concurrency: usize,
    pub queue_capacity: usize,
    /// Each worker gets its own backoff built from this.
    pub backoff: BackoffConfig,
    /// Applied to every single attempt, not to the whole retry sequence.
    pub attempt_timeout: Option<Duration>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backoff: BackoffConfig::default(),
            attempt_timeout: None,
        }
    }
}

/// A target that never made it to a worker (e.g. an unencodable device token).
#[derive(Debug)]
pub struct SkippedTarget {
    pub target: String,
    pub reason: PushError,
}

#[derive(Clone)]
pub struct Dispatcher {
    options: DispatchOptions,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        let permits = Arc::new(Semaphore::new(
            options.max_concurrency.clamp(1, Semaphore::MAX_PERMITS),
        ));
        Self { options, permits }
    }

    /// Deliver every job and wait for all of them.
    ///
    /// Jobs are pulled from `jobs` by a separate producer task, so building a
    /// worker may be deferred until it is needed. Failures are logged here and
    /// reported per target; the call itself never fails.
    pub async fn run<W, I>(&self, transport: Transport, jobs: I) -> DispatchReport
    where
        W: Worker,
        I: IntoIterator<Item = Result<W, SkippedTarget>>,
        I::IntoIter: Send + 'static,
    {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::debug!(batch_id = %batch_id, transport = %transport, "Dispatch started");

        let (tx, mut rx) = mpsc::channel(self.options.queue_capacity.max(1));
        let jobs = jobs.into_iter();
        let producer = tokio::spawn(async move {
            for job in jobs {
                if tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        let mut tasks = JoinSet::new();
        // targets of tasks still running, for reporting a task that panics
        let mut in_flight: HashMap<task::Id, String> = HashMap::new();
        let mut deliveries = Vec::new();

        while let Some(job) = rx.recv().await {
            let worker = match job {
                Ok(worker) => worker,
                Err(skipped) => {
                    tracing::warn!(
                        batch_id = %batch_id,
                        recipient = %skipped.target,
                        error = %skipped.reason,
                        "Skipping target"
                    );
                    deliveries.push(DeliveryReport {
                        target: skipped.target,
                        status: DeliveryStatus::Skipped,
                        attempts: 0,
                        error: Some(skipped.reason.to_string()),
                    });
                    continue;
                }
            };

            tracing::trace!(
                batch_id = %batch_id,
                recipient = worker.target(),
                state = %AttemptState::Pending,
                "Waiting for a delivery slot"
            );
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "Concurrency limiter closed, abandoning dispatch");
                    break;
                }
            };

            let target = worker.target().to_string();
            let backoff = self.options.backoff.build();
            let attempt_timeout = self.options.attempt_timeout;
            let handle = tasks.spawn(async move {
                let report = deliver(worker, backoff, attempt_timeout).await;
                drop(permit);
                report
            });
            in_flight.insert(handle.id(), target);

            while let Some(done) = tasks.try_join_next_with_id() {
                collect(done, &mut in_flight, &mut deliveries);
            }
        }

        while let Some(done) = tasks.join_next_with_id().await {
            collect(done, &mut in_flight, &mut deliveries);
        }

        if let Err(e) = producer.await {
            tracing::error!(batch_id = %batch_id, error = %e, "Worker producer task failed");
        }

        let report = DispatchReport {
            batch_id,
            transport,
            started_at,
            finished_at: Utc::now(),
            deliveries,
        };

        tracing::info!(
            batch_id = %batch_id,
            transport = %transport,
            targets = report.deliveries.len(),
            delivered = report.delivered(),
            failed = report.failed(),
            "Dispatch finished"
        );

        report
    }
}

fn collect(
    done: Result<(task::Id, DeliveryReport), JoinError>,
    in_flight: &mut HashMap<task::Id, String>,
    deliveries: &mut Vec<DeliveryReport>,
) {
    match done {
        Ok((id, report)) => {
            in_flight.remove(&id);
            deliveries.push(report);
        }
        Err(e) => {
            let target = in_flight.remove(&e.id()).unwrap_or_default();
            tracing::error!(recipient = %target, error = %e, "Delivery task aborted");
            deliveries.push(DeliveryReport {
                target,
                status: DeliveryStatus::Exhausted,
                attempts: 0,
                error: Some(format!("delivery task aborted: {}", e)),
            });
        }
    }
}

async fn deliver<W: Worker>(
    worker: W,
    mut backoff: ExponentialBackoff,
    attempt_timeout: Option<Duration>,
) -> DeliveryReport {
    let worker = &worker;
    let attempted = retry_counted(
        move || attempt(worker, attempt_timeout),
        &mut backoff,
    )
    .await;

    let target = worker.target().to_string();

    match attempted.result {
        Ok(()) => {
            tracing::debug!(
                recipient = %target,
                attempts = attempted.attempts,
                state = %attempted.state,
                "Notification delivered"
            );
            DeliveryReport {
                target,
                status: DeliveryStatus::Delivered,
                attempts: attempted.attempts,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(
                recipient = %target,
                attempts = attempted.attempts,
                state = %attempted.state,
                error = %e,
                "Notification delivery failed"
            );
            DeliveryReport {
                target,
                status: DeliveryStatus::Exhausted,
                attempts: attempted.attempts,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn attempt<W: Worker>(worker: &W, attempt_timeout: Option<Duration>) -> Result<(), PushError> {
    match attempt_timeout {
        Some(limit) => tokio::time::timeout(limit, worker.work())
            .await
            .unwrap_or(Err(PushError::Timeout(limit))),
        None => worker.work().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use async_trait::async_trait;

    /// Fails its first `failures` attempts, then succeeds.
    struct FlakyWorker {
        target: String,
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Worker for FlakyWorker {
        fn target(&self) -> &str {
            &self.target
        }

        async fn work(&self) -> Result<(), PushError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(PushError::Tls("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Tracks the highest number of simultaneously running attempts.
    struct SlowWorker {
        target: String,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for SlowWorker {
        fn target(&self) -> &str {
            &self.target
        }

        async fn work(&self) -> Result<(), PushError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn options(retries: u32) -> DispatchOptions {
        DispatchOptions {
            backoff: BackoffConfig::fixed(Duration::from_millis(1), retries),
            ..DispatchOptions::default()
        }
    }

    #[tokio::test]
    async fn test_every_target_gets_one_worker_run() {
        let calls: Vec<_> = (0..5).map(|_| Arc::new(AtomicU32::new(0))).collect();
        let workers: Vec<_> = calls
            .iter()
            .enumerate()
            .map(|(i, calls)| {
                Ok(FlakyWorker {
                    target: format!("target-{}", i),
                    failures: 0,
                    calls: calls.clone(),
                })
            })
            .collect();

        let report = Dispatcher::new(options(3)).run(Transport::Fcm, workers).await;

        assert_eq!(report.deliveries.len(), 5);
        assert_eq!(report.delivered(), 5);
        for c in &calls {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_returns_only_after_retries_complete() {
        let calls = Arc::new(AtomicU32::new(0));
        let workers = vec![Ok(FlakyWorker {
            target: "flaky".to_string(),
            failures: 2,
            calls: calls.clone(),
        })];

        let report = Dispatcher::new(options(5)).run(Transport::Fcm, workers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let delivery = report.get("flaky").unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert_eq!(delivery.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_target_is_reported_not_raised() {
        let calls = Arc::new(AtomicU32::new(0));
        let workers = vec![
            Ok(FlakyWorker {
                target: "dead".to_string(),
                failures: u32::MAX,
                calls: calls.clone(),
            }),
            Ok(FlakyWorker {
                target: "alive".to_string(),
                failures: 0,
                calls: Arc::new(AtomicU32::new(0)),
            }),
        ];

        let report = Dispatcher::new(options(3)).run(Transport::ApnsLegacy, workers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let dead = report.get("dead").unwrap();
        assert_eq!(dead.status, DeliveryStatus::Exhausted);
        assert_eq!(dead.attempts, 4);
        assert!(dead.error.as_deref().unwrap().contains("connection reset"));
        assert_eq!(report.get("alive").unwrap().status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_skipped_targets_are_reported() {
        let jobs: Vec<Result<FlakyWorker, SkippedTarget>> = vec![
            Err(SkippedTarget {
                target: "not-hex".to_string(),
                reason: PushError::InvalidToken("not-hex".to_string()),
            }),
            Ok(FlakyWorker {
                target: "ok".to_string(),
                failures: 0,
                calls: Arc::new(AtomicU32::new(0)),
            }),
        ];

        let report = Dispatcher::new(options(0)).run(Transport::ApnsLegacy, jobs).await;

        let skipped = report.get("not-hex").unwrap();
        assert_eq!(skipped.status, DeliveryStatus::Skipped);
        assert_eq!(skipped.attempts, 0);
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_capped() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..8)
            .map(|i| {
                Ok(SlowWorker {
                    target: format!("slow-{}", i),
                    running: running.clone(),
                    peak: peak.clone(),
                })
            })
            .collect();

        let dispatcher = Dispatcher::new(DispatchOptions {
            max_concurrency: 2,
            queue_capacity: 1,
            ..options(0)
        });
        let report = dispatcher.run(Transport::Fcm, workers).await;

        assert_eq!(report.delivered(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        struct HangingWorker;

        #[async_trait]
        impl Worker for HangingWorker {
            fn target(&self) -> &str {
                "hanging"
            }

            async fn work(&self) -> Result<(), PushError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }

        let dispatcher = Dispatcher::new(DispatchOptions {
            attempt_timeout: Some(Duration::from_millis(10)),
            ..options(1)
        });
        let report = dispatcher.run(Transport::Fcm, vec![Ok(HangingWorker)]).await;

        let delivery = report.get("hanging").unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Exhausted);
        assert_eq!(delivery.attempts, 2);
        assert!(delivery.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panicking_worker_is_still_reported() {
        struct PanickingWorker;

        #[async_trait]
        impl Worker for PanickingWorker {
            fn target(&self) -> &str {
                "panics"
            }

            async fn work(&self) -> Result<(), PushError> {
                panic!("worker bug");
            }
        }

        let report = Dispatcher::new(options(2))
            .run(Transport::Fcm, vec![Ok(PanickingWorker), Ok(PanickingWorker)])
            .await;

        assert_eq!(report.deliveries.len(), 2);
        for delivery in &report.deliveries {
            assert_eq!(delivery.target, "panics");
            assert_eq!(delivery.status, DeliveryStatus::Exhausted);
            assert!(delivery.error.as_deref().unwrap().contains("panicked"));
        }
    }

    #[tokio::test]
    async fn test_empty_dispatch() {
        let jobs: Vec<Result<FlakyWorker, SkippedTarget>> = Vec::new();
        let report = Dispatcher::new(DispatchOptions::default())
            .run(Transport::Fcm, jobs)
            .await;
        assert!(report.deliveries.is_empty());
        assert!(report.finished_at >= report.started_at);
    }
}
