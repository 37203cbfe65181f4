//! Fixed-size pool of webhook workers draining a bounded queue.
//!
//! `enqueue` never blocks. Each job runs on its own task so a panic is caught
//! at the join point and only that job is lost. Outcomes are counted in
//! [`PoolMetrics`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    application::use_cases::webhook_ingest::{EventHandler, EventQueue},
    domain::entities::billing_event::WebhookEnvelope,
};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Rejected by `enqueue` (queue full or stopping).
    pub dropped: u64,
    /// Still queued or running when the drain timeout expired.
    pub abandoned: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable enqueue side of the pool.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<WebhookEnvelope>,
    stopping: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl WorkerHandle {
    pub fn enqueue(&self, envelope: WebhookEnvelope) -> bool {
        if self.stopping.load(Ordering::Acquire) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = %envelope.event_id, "Worker pool stopping, event rejected");
            return false;
        }
        match self.sender.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let envelope = e.into_inner();
                warn!(event_id = %envelope.event_id, "Worker queue rejected event");
                false
            }
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.counters.snapshot()
    }
}

impl EventQueue for WorkerHandle {
    fn enqueue(&self, envelope: WebhookEnvelope) -> bool {
        WorkerHandle::enqueue(self, envelope)
    }
}

type JobSlot = Arc<StdMutex<Option<AbortHandle>>>;

pub struct WorkerPool {
    handle: WorkerHandle,
    receiver: Arc<Mutex<mpsc::Receiver<WebhookEnvelope>>>,
    stop_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    job_slots: Vec<JobSlot>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    pub fn start(config: WorkerPoolConfig, handler: Arc<dyn EventHandler>) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(workers);
        let mut job_slots = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let slot: JobSlot = Arc::new(StdMutex::new(None));
            job_slots.push(slot.clone());
            handles.push(tokio::spawn(run_worker(
                worker_id,
                receiver.clone(),
                stop_rx.clone(),
                handler.clone(),
                counters.clone(),
                slot,
            )));
        }

        info!(
            workers,
            queue_capacity = config.queue_capacity,
            "Webhook worker pool started"
        );

        Self {
            handle: WorkerHandle {
                sender,
                stopping: Arc::new(AtomicBool::new(false)),
                counters,
            },
            receiver,
            stop_tx,
            workers: handles,
            job_slots,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.handle.metrics()
    }

    /// Stop accepting work, let workers drain the queue, and abandon whatever
    /// is left when the timeout expires.
    pub async fn shutdown(self) -> PoolMetrics {
        let WorkerPool {
            handle,
            receiver,
            stop_tx,
            workers,
            job_slots,
            shutdown_timeout,
        } = self;

        handle.stopping.store(true, Ordering::Release);
        let _ = stop_tx.send(true);
        info!("Webhook worker pool stopping");

        let abort_handles: Vec<AbortHandle> = workers.iter().map(JoinHandle::abort_handle).collect();
        let drain = async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    error!(error = %e, "Webhook worker exited abnormally");
                }
            }
        };

        if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
            let counters = &handle.counters;
            for slot in &job_slots {
                let running = slot.lock().ok().and_then(|mut current| current.take());
                if let Some(job) = running {
                    job.abort();
                    counters.abandoned.fetch_add(1, Ordering::Relaxed);
                }
            }
            for worker in abort_handles {
                worker.abort();
            }
            // Aborted workers no longer hold the receiver lock.
            let mut receiver = receiver.lock().await;
            while receiver.try_recv().is_ok() {
                counters.abandoned.fetch_add(1, Ordering::Relaxed);
            }
            warn!(
                abandoned = counters.abandoned.load(Ordering::Relaxed),
                timeout_secs = shutdown_timeout.as_secs_f64(),
                "Webhook worker pool drain timed out"
            );
        }

        let metrics = handle.metrics();
        info!(?metrics, "Webhook worker pool stopped");
        metrics
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WebhookEnvelope>>>,
    mut stop: watch::Receiver<bool>,
    handler: Arc<dyn EventHandler>,
    counters: Arc<Counters>,
    slot: JobSlot,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            if *stop.borrow() {
                rx.try_recv().ok()
            } else {
                tokio::select! {
                    job = rx.recv() => job,
                    _ = stop.changed() => rx.try_recv().ok(),
                }
            }
        };
        let Some(envelope) = next else {
            break;
        };
        run_job(worker_id, envelope, &handler, &counters, &slot).await;
    }
    info!(worker = worker_id, "Webhook worker exited");
}

async fn run_job(
    worker_id: usize,
    envelope: WebhookEnvelope,
    handler: &Arc<dyn EventHandler>,
    counters: &Counters,
    slot: &JobSlot,
) {
    let span = info_span!(
        "webhook-job",
        event_id = %envelope.event_id,
        event_type = %envelope.event_type,
        worker = worker_id
    );
    let handler = handler.clone();
    let task = tokio::spawn(async move { handler.handle(&envelope).await }.instrument(span.clone()));
    if let Ok(mut current) = slot.lock() {
        *current = Some(task.abort_handle());
    }

    let result = task.await;
    if let Ok(mut current) = slot.lock() {
        current.take();
    }

    span.in_scope(|| match result {
        Ok(Ok(())) => {
            counters.processed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Webhook job failed");
        }
        Err(e) if e.is_panic() => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Webhook job panicked, worker continues");
        }
        // Aborted by the drain timeout, which counts it.
        Err(_) => {}
    });
}
