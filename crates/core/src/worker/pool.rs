//! Worker pool implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionEngine, AdmissionOutcome, AdmissionState};
use crate::channel::{Delivery, RequestChannel};
use crate::metrics;

use super::config::WorkerConfig;
use super::retry::RetryPolicy;
use super::types::{OutcomeReport, WorkerError, WorkerPoolStatus};

/// Called once for every terminal admission result.
pub type OutcomeCallback = Arc<dyn Fn(&OutcomeReport) + Send + Sync>;

const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    admitted: AtomicU64,
    already_admitted: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
}

/// State shared by every worker task.
struct Worker {
    id: usize,
    channel: Arc<dyn RequestChannel>,
    engine: AdmissionEngine,
    retry: RetryPolicy,
    error_backoff: Duration,
    on_outcome: Option<OutcomeCallback>,
    counters: Arc<Counters>,
}

/// Pool of admission workers consuming the request channel.
pub struct WorkerPool {
    config: WorkerConfig,
    channel: Arc<dyn RequestChannel>,
    engine: AdmissionEngine,
    retry: RetryPolicy,
    error_backoff: Duration,
    on_outcome: Option<OutcomeCallback>,

    // Runtime state
    running: AtomicBool,
    counters: Arc<Counters>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new pool. Nothing runs until [`WorkerPool::start`].
    pub fn new(
        config: WorkerConfig,
        channel: Arc<dyn RequestChannel>,
        engine: AdmissionEngine,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let retry = RetryPolicy::from(&config.retry);

        Self {
            config,
            channel,
            engine,
            retry,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            on_outcome: None,
            running: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Observe every terminal admission result.
    pub fn with_outcome_callback(mut self, callback: OutcomeCallback) -> Self {
        self.on_outcome = Some(callback);
        self
    }

    /// How long a worker pauses after the channel fails to deliver.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Spawn `config.count` worker tasks.
    pub fn start(&self) -> Result<(), WorkerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return Err(WorkerError::AlreadyRunning);
        }

        info!("Starting {} admission workers", self.config.count);

        let mut handles = self
            .handles
            .lock()
            .map_err(|_| WorkerError::Join("handle list poisoned".to_string()))?;
        for id in 0..self.config.count {
            let worker = Worker {
                id,
                channel: Arc::clone(&self.channel),
                engine: self.engine.clone(),
                retry: self.retry.clone(),
                error_backoff: self.error_backoff,
                on_outcome: self.on_outcome.clone(),
                counters: Arc::clone(&self.counters),
            };
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker.run(shutdown_rx)));
        }

        Ok(())
    }

    /// Signal shutdown and wait for every worker to finish its current
    /// delivery.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Worker pool not running");
            return Err(WorkerError::NotRunning);
        }

        info!("Stopping worker pool");

        // Signal shutdown to all workers
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => return Err(WorkerError::Join("handle list poisoned".to_string())),
        };

        let mut failure = None;
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
                failure = Some(WorkerError::Join(e.to_string()));
            }
        }

        info!("Worker pool stopped");
        failure.map_or(Ok(()), Err)
    }

    /// Get current pool status.
    pub fn status(&self) -> WorkerPoolStatus {
        let running = self.running.load(Ordering::Relaxed);
        let counters = &self.counters;
        WorkerPoolStatus {
            running,
            workers: if running { self.config.count } else { 0 },
            processed: counters.processed.load(Ordering::Relaxed),
            admitted: counters.admitted.load(Ordering::Relaxed),
            already_admitted: counters.already_admitted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Worker {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        metrics::WORKERS_ACTIVE.inc();
        debug!(worker = self.id, "Worker started");

        loop {
            let received = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(worker = self.id, "Worker received shutdown signal");
                    break;
                }
                received = self.channel.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => self.handle(delivery),
                Ok(None) => {
                    info!(worker = self.id, "Request channel closed");
                    break;
                }
                Err(e) => {
                    warn!(worker = self.id, "Failed to receive booking request: {}", e);
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        metrics::WORKERS_ACTIVE.dec();
        debug!(worker = self.id, "Worker stopped");
    }

    fn handle(&self, delivery: Delivery) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        if delivery.redelivered() {
            metrics::REDELIVERIES.inc();
        }
        let delivery_count = delivery.delivery_count();

        let request = match delivery.decode() {
            Ok(request) => request,
            Err(e) => {
                // Not a booking request at all; acked like any other malformed one.
                warn!(worker = self.id, tag = %delivery.tag(), "Dropping undecodable message: {}", e);
                metrics::ADMISSIONS
                    .with_label_values(&[AdmissionState::RejectedMalformed.as_str()])
                    .inc();
                self.finish(
                    delivery,
                    OutcomeReport {
                        ticket_id: None,
                        event_id: None,
                        delivery_count,
                        outcome: AdmissionOutcome::malformed(e.to_string()),
                    },
                );
                return;
            }
        };

        // A rejection must be queryable before the message is acked.
        let decided = self
            .engine
            .admit(&request)
            .and_then(|outcome| self.engine.record(&request, &outcome).map(|()| outcome));

        match decided {
            Ok(outcome) => self.finish(
                delivery,
                OutcomeReport {
                    ticket_id: Some(request.reservation_id),
                    event_id: Some(request.event_id),
                    delivery_count,
                    outcome,
                },
            ),
            Err(e) => {
                let delay = self.retry.delay_for_delivery(delivery_count);
                warn!(
                    worker = self.id,
                    ticket_id = %request.reservation_id,
                    delivery_count,
                    "Admission failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                metrics::RETRIES_SCHEDULED.inc();
                if let Err(e) = delivery.nack(delay) {
                    // The lease will run out and the message comes back anyway.
                    warn!(worker = self.id, "Failed to nack delivery: {}", e);
                }
            }
        }
    }

    fn finish(&self, delivery: Delivery, report: OutcomeReport) {
        let counter = match report.outcome.state() {
            AdmissionState::Admitted => &self.counters.admitted,
            AdmissionState::AlreadyAdmitted => &self.counters.already_admitted,
            _ => &self.counters.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = delivery.ack() {
            // Redelivery is harmless: the ledger reports AlreadyAdmitted.
            warn!(worker = self.id, "Failed to ack delivery: {}", e);
        }

        if let Some(callback) = &self.on_outcome {
            callback(&report);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::booking::BookingRequest;
    use crate::channel::{MemoryRequestChannel, RequestChannel};
    use crate::config::RetryConfig;
    use crate::store::{CapacityStore, EventRegistry, MemoryStore, ReservationLedger};
    use crate::testing::{fixtures, FlakyStore};

    fn config(count: usize) -> WorkerConfig {
        WorkerConfig {
            enabled: true,
            count,
            retry: RetryConfig {
                initial_delay_ms: 10,
                max_delay_ms: 50,
                multiplier: 2.0,
            },
        }
    }

    fn recorder() -> (OutcomeCallback, Arc<StdMutex<Vec<OutcomeReport>>>) {
        let reports = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let callback: OutcomeCallback = Arc::new(move |report: &OutcomeReport| {
            sink.lock().unwrap().push(report.clone());
        });
        (callback, reports)
    }

    async fn wait_for_reports(reports: &StdMutex<Vec<OutcomeReport>>, n: usize) {
        for _ in 0..200 {
            if reports.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} outcomes", n);
    }

    #[tokio::test]
    async fn test_pool_admits_and_acks() {
        let store = Arc::new(MemoryStore::new());
        let event = store
            .create_event(fixtures::event_request("Concert", 3))
            .unwrap();
        let channel = Arc::new(MemoryRequestChannel::new());
        let (callback, reports) = recorder();

        let pool = WorkerPool::new(
            config(2),
            Arc::clone(&channel) as Arc<dyn RequestChannel>,
            AdmissionEngine::from_store(Arc::clone(&store)),
        )
        .with_outcome_callback(callback);
        pool.start().unwrap();

        for i in 0..4 {
            channel
                .publish(&fixtures::booking(&format!("t-{}", i), &event.id, 1))
                .await
                .unwrap();
        }
        wait_for_reports(&reports, 4).await;
        pool.stop().await.unwrap();

        let status = pool.status();
        assert!(!status.running);
        assert_eq!(status.processed, 4);
        assert_eq!(status.admitted, 3);
        assert_eq!(status.rejected, 1);
        assert_eq!(store.sold_quantity(&event.id).unwrap(), 3);
        assert!(channel.is_empty());

        // Every ticket id ends up either reserved or recorded as rejected.
        let mut recorded = 0;
        for i in 0..4 {
            let id = format!("t-{}", i);
            match store.get_rejection(&id).unwrap() {
                Some(rejection) => {
                    assert_eq!(rejection.reason, "insufficient_capacity");
                    assert!(store.get(&id).unwrap().is_none());
                    recorded += 1;
                }
                None => assert!(store.get(&id).unwrap().is_some()),
            }
        }
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn test_malformed_request_is_acked() {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(MemoryRequestChannel::new());
        let (callback, reports) = recorder();

        let mut bad = fixtures::booking("t-1", "e-1", 1);
        bad.quantity = -1;
        channel.publish(&bad).await.unwrap();

        let pool = WorkerPool::new(
            config(1),
            Arc::clone(&channel) as Arc<dyn RequestChannel>,
            AdmissionEngine::from_store(Arc::clone(&store)),
        )
        .with_outcome_callback(callback);
        pool.start().unwrap();
        wait_for_reports(&reports, 1).await;
        pool.stop().await.unwrap();

        let reports = reports.lock().unwrap();
        assert_eq!(reports[0].outcome.state(), AdmissionState::RejectedMalformed);
        assert_eq!(reports[0].ticket_id.as_deref(), Some("t-1"));
        assert!(channel.is_empty());
        assert_eq!(store.get_rejection("t-1").unwrap().unwrap().reason, "malformed");
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (flaky, event_id) = FlakyStore::with_event(5);
        let flaky = Arc::new(flaky);
        flaky.fail_next(2);

        let channel = Arc::new(MemoryRequestChannel::new());
        let (callback, reports) = recorder();
        channel
            .publish(&fixtures::booking("t-1", &event_id, 2))
            .await
            .unwrap();

        let pool = WorkerPool::new(
            config(1),
            Arc::clone(&channel) as Arc<dyn RequestChannel>,
            AdmissionEngine::from_store(Arc::clone(&flaky)),
        )
        .with_outcome_callback(callback);
        pool.start().unwrap();
        wait_for_reports(&reports, 1).await;
        pool.stop().await.unwrap();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].outcome.is_admitted());
        assert_eq!(reports[0].delivery_count, 3);

        let status = pool.status();
        assert_eq!(status.retried, 2);
        assert_eq!(status.processed, 3);
        assert_eq!(flaky.inner().get("t-1").unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_rejection_not_acked_until_recorded() {
        let (flaky, _) = FlakyStore::with_event(5);
        let flaky = Arc::new(flaky);
        flaky.fail_rejections(true);

        let channel = Arc::new(MemoryRequestChannel::new());
        let (callback, reports) = recorder();
        channel
            .publish(&fixtures::booking("t-1", "no-such-event", 1))
            .await
            .unwrap();

        let pool = WorkerPool::new(
            config(1),
            Arc::clone(&channel) as Arc<dyn RequestChannel>,
            AdmissionEngine::from_store(Arc::clone(&flaky)),
        )
        .with_outcome_callback(callback);
        pool.start().unwrap();

        for _ in 0..200 {
            if pool.status().retried >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pool.status().retried >= 2);
        assert!(reports.lock().unwrap().is_empty());
        assert_eq!(channel.len(), 1);

        flaky.fail_rejections(false);
        wait_for_reports(&reports, 1).await;
        pool.stop().await.unwrap();

        assert_eq!(
            reports.lock().unwrap()[0].outcome.state(),
            AdmissionState::RejectedNotFound
        );
        assert_eq!(
            flaky.inner().get_rejection("t-1").unwrap().unwrap().reason,
            "resource_not_found"
        );
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_twice() {
        let pool = WorkerPool::new(
            config(1),
            Arc::new(MemoryRequestChannel::new()) as Arc<dyn RequestChannel>,
            AdmissionEngine::from_store(Arc::new(MemoryStore::new())),
        );

        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(WorkerError::AlreadyRunning)));
        assert_eq!(pool.status().workers, 1);

        pool.stop().await.unwrap();
        assert!(matches!(pool.stop().await, Err(WorkerError::NotRunning)));
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_workers_exit_when_channel_closes() {
        let channel = Arc::new(MemoryRequestChannel::new());
        let pool = WorkerPool::new(
            config(2),
            Arc::clone(&channel) as Arc<dyn RequestChannel>,
            AdmissionEngine::from_store(Arc::new(MemoryStore::new())),
        );
        pool.start().unwrap();

        channel.close();
        tokio::time::timeout(Duration::from_secs(2), pool.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_redelivered_admission_not_double_counted() {
        let store = Arc::new(MemoryStore::new());
        let event = store
            .create_event(fixtures::event_request("Concert", 10))
            .unwrap();
        let channel = Arc::new(MemoryRequestChannel::new());
        let (callback, reports) = recorder();

        let request: BookingRequest = fixtures::booking("t-1", &event.id, 4);
        channel.publish(&request).await.unwrap();
        channel.publish(&request).await.unwrap();

        let pool = WorkerPool::new(
            config(2),
            Arc::clone(&channel) as Arc<dyn RequestChannel>,
            AdmissionEngine::from_store(Arc::clone(&store)),
        )
        .with_outcome_callback(callback);
        pool.start().unwrap();
        wait_for_reports(&reports, 2).await;
        pool.stop().await.unwrap();

        let status = pool.status();
        assert_eq!(status.admitted, 1);
        assert_eq!(status.already_admitted, 1);
        assert_eq!(store.sold_quantity(&event.id).unwrap(), 4);
    }
}
