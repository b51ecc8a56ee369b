//! WorkerLoop: dequeue → process → publish → ack.
//!
//! # Flow
//! 1. `QueueTransport::dequeue(pop_wait)`, raced against shutdown
//! 2. Run the processor on its own task (a panic becomes `Outcome::Failed`)
//! 3. `ResultStore::publish` the record under the envelope's job id
//! 4. `QueueTransport::ack` the claim
//! 5. Optional throttle sleep
//!
//! Shutdown is only checked between jobs; an in-flight job runs to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::processor::Processor;
use crate::domain::{CourierError, JobState, Outcome, ResultRecord, RetryPolicy};
use crate::ports::{Claim, QueueTransport, ResultStore};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long one dequeue may block before the loop re-checks shutdown.
    pub pop_wait: Duration,

    /// Sleep after each processed job.
    pub throttle: Option<Duration>,

    /// Upper bound on a single processor call.
    pub process_timeout: Option<Duration>,

    /// Backoff after transport failures.
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pop_wait: Duration::from_secs(1),
            throttle: None,
            process_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct WorkerLoop {
    worker_id: usize,
    transport: Arc<dyn QueueTransport>,
    store: Arc<dyn ResultStore>,
    processor: Arc<dyn Processor>,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        worker_id: usize,
        transport: Arc<dyn QueueTransport>,
        store: Arc<dyn ResultStore>,
        processor: Arc<dyn Processor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id,
            transport,
            store,
            processor,
            config,
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let worker_id = self.worker_id;
        tracing::info!(worker_id, "worker started");

        let mut failures = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }

            // A dequeue abandoned here may still claim an envelope on Redis;
            // it is re-delivered once its claim expires.
            let claimed = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                claimed = self.transport.dequeue(self.config.pop_wait) => claimed,
            };

            let result = match claimed {
                Ok(Some(claim)) => self.process_claim(claim).await,
                Ok(None) => continue,
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => {
                    failures = 0;
                    if let Some(throttle) = self.config.throttle {
                        tokio::time::sleep(throttle).await;
                    }
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    let delay = self.config.retry.next_delay(failures);
                    tracing::error!(worker_id, error = %err, attempt = failures, ?delay, "transport failure");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    // poison envelope or similar; nothing to retry
                    tracing::error!(worker_id, error = %err, "dropped job");
                }
            }
        }

        tracing::info!(worker_id, "worker stopped");
    }

    /// Process one claimed envelope through publish and ack.
    ///
    /// Returns an error only when the result could not be published. The
    /// claim is then left unacked so the reaper re-delivers it.
    pub async fn process_claim(&self, claim: Claim) -> Result<(), CourierError> {
        let worker_id = self.worker_id;
        let job_id = claim.job_id();
        let queued_ms = claim.queued_for().num_milliseconds();
        let mut state = JobState::Queued.advance(JobState::Claimed, job_id);
        tracing::debug!(worker_id, %job_id, %state, queued_ms, "claimed");

        let outcome = self.execute(claim.envelope().payload().clone()).await;
        state = state.advance(JobState::Processed, job_id);
        tracing::debug!(
            worker_id,
            %job_id,
            %state,
            success = outcome.is_success(),
            "processed"
        );

        let record = ResultRecord::new(job_id, outcome);
        match self.store.publish(&record).await {
            Ok(()) => {
                state = state.advance(JobState::Published, job_id);
                tracing::debug!(worker_id, %job_id, %state, "published");
            }
            Err(CourierError::DuplicatePublish { .. }) => {
                tracing::warn!(worker_id, %job_id, "result already published by an earlier delivery; keeping it");
            }
            Err(err) => {
                tracing::error!(worker_id, %job_id, error = %err, "publish failed; claim left for re-delivery");
                return Err(err);
            }
        }

        if let Err(err) = self.transport.ack(&claim).await {
            // the result is out; a re-delivery would only hit DuplicatePublish
            tracing::warn!(worker_id, %job_id, error = %err, "ack failed");
        }
        Ok(())
    }

    async fn execute(&self, payload: serde_json::Value) -> Outcome {
        let processor = Arc::clone(&self.processor);
        let mut task = tokio::spawn(async move { processor.process(payload).await });

        let joined = match self.config.process_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    tracing::warn!(?limit, "processor timed out");
                    return Outcome::failed(format!("processing exceeded {limit:?}"));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(value)) => Outcome::success(value),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "processor failed");
                Outcome::failed(err.to_string())
            }
            Err(join_err) if join_err.is_panic() => {
                tracing::error!("processor panicked");
                Outcome::failed("processor panicked")
            }
            Err(join_err) => Outcome::failed(format!("processor task cancelled: {join_err}")),
        }
    }
}
