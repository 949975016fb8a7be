//! Worker pool
//!
//! N stateless, interchangeable workers each run a dequeue → process →
//! ack/nack loop, selecting on message arrival and the shutdown signal.
//! Shutdown is graceful: a worker finishes its current message before
//! exiting, and `shutdown()` fences on every worker having stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::escalation::{EscalationQueue, NackOutcome, QueueMessage};
use super::processor::ProcessorError;

/// Message handler run by every worker.
#[async_trait::async_trait]
pub trait QueueProcessor: Send + Sync {
    /// Handle one leased message. `Err` nacks it.
    async fn process(&self, message: &QueueMessage) -> Result<(), ProcessorError>;

    /// Called once when a message exhausts its retries.
    async fn on_dead(&self, message: &QueueMessage, error: &str);
}

/// Pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of workers.
    pub workers: usize,
    /// Per-iteration dequeue wait; bounds shutdown latency.
    pub dequeue_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dequeue_timeout: Duration::from_secs(1),
        }
    }
}

/// Pool of escalation workers.
pub struct WorkerPool {
    queue: Arc<EscalationQueue>,
    processor: Arc<dyn QueueProcessor>,
    config: WorkerPoolConfig,
    shutdown: watch::Sender<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool; call [`start`](Self::start) to spawn the workers.
    pub fn new(
        queue: Arc<EscalationQueue>,
        processor: Arc<dyn QueueProcessor>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            processor,
            config,
            shutdown,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the configured number of workers.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        for worker_id in 0..self.config.workers {
            let queue = Arc::clone(&self.queue);
            let processor = Arc::clone(&self.processor);
            let shutdown = self.shutdown.subscribe();
            let timeout = self.config.dequeue_timeout;
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, processor, shutdown, timeout).await;
            }));
        }
        info!(workers = self.config.workers, "worker pool started");
    }

    /// Signal shutdown and wait for every worker to finish its current
    /// message.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "worker join failed");
            }
        }
        info!("worker pool drained");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<EscalationQueue>,
    processor: Arc<dyn QueueProcessor>,
    mut shutdown: watch::Receiver<bool>,
    dequeue_timeout: Duration,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let message = tokio::select! {
            _ = shutdown.changed() => continue,
            message = queue.dequeue(dequeue_timeout) => message,
        };
        let Some(message) = message else {
            continue;
        };

        match processor.process(&message).await {
            Ok(()) => {
                if let Err(e) = queue.acknowledge(&message).await {
                    warn!(worker_id, request_id = %message.request_id, error = %e, "ack failed");
                }
            }
            Err(error) => {
                match queue.nack(&message, &error.message).await {
                    Ok(NackOutcome::Dead) => {
                        processor.on_dead(&message, &error.message).await;
                    }
                    Ok(NackOutcome::Retrying { attempt, delay }) => {
                        debug!(
                            worker_id,
                            request_id = %message.request_id,
                            attempt,
                            ?delay,
                            "message re-queued"
                        );
                    }
                    Err(e) => {
                        warn!(worker_id, request_id = %message.request_id, error = %e, "nack failed");
                    }
                }
            }
        }
    }
    debug!(worker_id, "worker stopped");
}
