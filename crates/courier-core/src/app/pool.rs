//! WorkerPool: N worker loops sharing one shutdown signal.
//!
//! `shutdown_and_join` lets every in-flight job finish before returning.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::processor::Processor;
use super::worker_loop::{WorkerConfig, WorkerLoop};
use crate::ports::{QueueTransport, ResultStore};

/// Worker pool handle.
/// - dropping the pool (or `request_shutdown`) stops every worker after its current job
/// - `shutdown_and_join()` waits for all of them
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers sharing one transport, store and processor.
    pub fn spawn(
        n: usize,
        transport: Arc<dyn QueueTransport>,
        store: Arc<dyn ResultStore>,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let worker = WorkerLoop::new(
                    worker_id,
                    Arc::clone(&transport),
                    Arc::clone(&store),
                    Arc::clone(&processor),
                    config.clone(),
                );
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();

        tracing::info!(workers = n, "worker pool started");
        Self { shutdown_tx, joins }
    }

    pub fn worker_count(&self) -> usize {
        self.joins.len()
    }

    /// Ask every worker to stop taking new jobs.
    /// In-flight jobs are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "worker task ended abnormally");
            }
        }
        tracing::info!("worker pool stopped");
    }
}
