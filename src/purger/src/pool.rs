//! Deletion worker pool
//!
//! A fixed number of tokio tasks pull delete jobs from one bounded queue.
//! Each job is attempted under a timeout and retried once; a job failing
//! twice is counted as skipped and never affects the other jobs.

use common::config::PurgeConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::deleter::Deleter;
use crate::metrics::RunCounters;
use crate::resolver::PurgeTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Ceiling for one delete attempt
    pub delete_timeout: Duration,
    /// Pause before the single retry
    pub retry_backoff: Duration,
    /// Log progress every this many processed jobs
    pub progress_interval: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PurgeConfig::default())
    }
}

impl From<&PurgeConfig> for PoolConfig {
    fn from(config: &PurgeConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            delete_timeout: config.delete_timeout,
            retry_backoff: config.retry_backoff,
            progress_interval: config.progress_interval as u64,
        }
    }
}

/// One object to delete
#[derive(Clone, Debug)]
pub struct DeleteJob {
    pub target: Arc<PurgeTarget>,
    pub key: String,
    pub size_bytes: u64,
}

pub struct DeletionPool {
    sender: mpsc::Sender<DeleteJob>,
    workers: Vec<JoinHandle<()>>,
}

struct WorkerContext {
    config: PoolConfig,
    deleter: Arc<dyn Deleter>,
    counters: RunCounters,
    processed: AtomicU64,
}

impl DeletionPool {
    /// Start the workers. They run until [`DeletionPool::drain`] closes the queue.
    pub fn spawn(config: PoolConfig, deleter: Arc<dyn Deleter>, counters: RunCounters) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let context = Arc::new(WorkerContext {
            config,
            deleter,
            counters,
            processed: AtomicU64::new(0),
        });

        let workers = (0..config.workers.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => context.process(job).await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Queue a job, waiting for room when the queue is full.
    ///
    /// Fails only when no worker is left to take the job.
    pub async fn submit(&self, job: DeleteJob) -> Result<(), mpsc::error::SendError<DeleteJob>> {
        self.sender.send(job).await
    }

    /// Close the queue and wait for every queued job to be processed.
    pub async fn drain(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Delete worker failed");
            }
        }
    }

    /// Delete every job with a fresh pool and wait for completion.
    ///
    /// Never starts more workers than there are jobs.
    pub async fn run(
        config: PoolConfig,
        deleter: Arc<dyn Deleter>,
        counters: RunCounters,
        jobs: Vec<DeleteJob>,
    ) {
        if jobs.is_empty() {
            return;
        }
        let config = PoolConfig {
            workers: config.workers.min(jobs.len()),
            ..config
        };
        let pool = Self::spawn(config, deleter, counters.clone());

        for job in jobs {
            if let Err(mpsc::error::SendError(job)) = pool.submit(job).await {
                tracing::debug!(key = %job.key, "No delete worker left, skipping file");
                counters.record_skipped();
            }
        }
        pool.drain().await;
    }
}

impl WorkerContext {
    async fn process(&self, job: DeleteJob) {
        let deleted = match self.attempt(&job.key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(key = %job.key, error = %e, "Delete failed, retrying");
                tokio::time::sleep(self.config.retry_backoff).await;
                match self.attempt(&job.key).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(
                            key = %job.key,
                            target = %job.target,
                            error = %e,
                            "Delete failed twice, skipping file"
                        );
                        false
                    }
                }
            }
        };

        if deleted {
            self.counters.record_deleted(job.size_bytes);
        } else {
            self.counters.record_skipped();
        }

        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.progress_interval > 0 && processed % self.config.progress_interval == 0 {
            tracing::info!(
                processed,
                deleted = self.counters.deleted(),
                skipped = self.counters.skipped(),
                "Deletion progress"
            );
        }
    }

    async fn attempt(&self, key: &str) -> anyhow::Result<()> {
        let timeout = self.config.delete_timeout;
        match tokio::time::timeout(timeout, self.deleter.delete(key)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("delete timed out after {timeout:?}")),
        }
    }
}
