//! Queued delivery: a bounded job channel drained by a fixed worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::pipeline::CarnetPipeline;
use super::progress::{PipelineEvent, ProgressSink};
use super::tracker::{GenerationRequest, StoreError, Tracker};
use crate::metrics;
use crate::people::PersonFilter;
use crate::tenant::TenantId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("generation queue is full")]
    Full,
    #[error("generation queue is shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
struct QueuedJob {
    id: Uuid,
    tenant: TenantId,
    filter: PersonFilter,
}

/// Persists pipeline progress on the request's tracker record.
struct TrackerSink {
    tracker: Tracker,
    id: Uuid,
}

#[async_trait]
impl ProgressSink for TrackerSink {
    async fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Started { total_users } => {
                log::info!("Request {}: generating {} carnets", self.id, total_users);
            }
            PipelineEvent::Progress { progress, .. } => {
                self.tracker.progress(self.id, progress).await;
            }
        }
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>;

pub struct CarnetQueue {
    tx: mpsc::Sender<QueuedJob>,
    rx: SharedReceiver,
    tracker: Tracker,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CarnetQueue {
    /// Spawn `workers` tasks draining a queue of `capacity` jobs.
    pub fn start(
        pipeline: Arc<CarnetPipeline>,
        tracker: Tracker,
        workers: usize,
        capacity: usize,
        max_attempts: u32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&rx),
                    Arc::clone(&pipeline),
                    tracker.clone(),
                    shutdown.clone(),
                    max_attempts,
                ))
            })
            .collect();

        log::info!(
            "Carnet queue started with {} workers (capacity {})",
            workers.max(1),
            capacity.max(1)
        );

        Self {
            tx,
            rx,
            tracker,
            shutdown,
            workers: Mutex::new(handles),
        }
    }

    /// Persist a new `PENDING` request and enqueue it.
    ///
    /// When the queue cannot take the job the request is marked `FAILED`
    /// before the error is returned.
    pub async fn submit(
        &self,
        tenant: TenantId,
        filter: PersonFilter,
    ) -> Result<GenerationRequest, QueueError> {
        let request = self.tracker.create(tenant, filter.clone()).await?;

        if self.shutdown.is_cancelled() {
            self.tracker
                .fail(request.id, QueueError::Closed.to_string())
                .await;
            return Err(QueueError::Closed);
        }

        let job = QueuedJob {
            id: request.id,
            tenant,
            filter,
        };

        match self.tx.try_send(job) {
            Ok(()) => {
                log::info!("Queued request {} for tenant {}", request.id, tenant);
                Ok(request)
            }
            Err(e) => {
                let error = match e {
                    mpsc::error::TrySendError::Full(_) => QueueError::Full,
                    mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
                };
                log::warn!("Rejecting request {}: {}", request.id, error);
                self.tracker.fail(request.id, error.to_string()).await;
                metrics::record_generation("queued", "rejected");
                Err(error)
            }
        }
    }

    /// Stop taking jobs and wait for workers to finish what they hold.
    /// Jobs still waiting in the channel are marked `FAILED`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Carnet worker ended abnormally: {}", e);
            }
        }

        let mut rx = self.rx.lock().await;
        rx.close();
        let mut abandoned = 0usize;
        while let Ok(job) = rx.try_recv() {
            self.tracker
                .fail(job.id, QueueError::Closed.to_string())
                .await;
            abandoned += 1;
        }
        log::info!("Carnet queue stopped ({} waiting requests failed)", abandoned);
    }
}

async fn run_worker(
    worker: usize,
    rx: SharedReceiver,
    pipeline: Arc<CarnetPipeline>,
    tracker: Tracker,
    shutdown: CancellationToken,
    max_attempts: u32,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };

        let Some(job) = job else { break };
        log::debug!("Worker {} picked up request {}", worker, job.id);
        process(job, &pipeline, &tracker, max_attempts).await;
    }
    log::debug!("Worker {} exiting", worker);
}

async fn process(
    job: QueuedJob,
    pipeline: &Arc<CarnetPipeline>,
    tracker: &Tracker,
    max_attempts: u32,
) {
    let QueuedJob { id, tenant, filter } = job;
    tracker.start(id).await;

    let task = {
        let pipeline = Arc::clone(pipeline);
        let sink = TrackerSink {
            tracker: tracker.clone(),
            id,
        };
        tokio::spawn(async move { pipeline.run(tenant, &filter, &sink, max_attempts).await })
    };

    match task.await {
        Ok(Ok(carnet)) => {
            tracker.complete(id, carnet.pdf_path).await;
            metrics::record_generation("queued", "completed");
        }
        Ok(Err(e)) => {
            log::warn!("Request {} for tenant {} failed: {}", id, tenant, e);
            tracker.fail(id, e.to_string()).await;
            metrics::record_generation("queued", e.kind());
        }
        Err(e) => {
            log::error!("Request {} for tenant {} aborted: {}", id, tenant, e);
            let message = if e.is_panic() {
                "carnet generation crashed unexpectedly"
            } else {
                "carnet generation was cancelled"
            };
            tracker.fail(id, message.to_string()).await;
            metrics::record_generation("queued", "crashed");
        }
    }
}
