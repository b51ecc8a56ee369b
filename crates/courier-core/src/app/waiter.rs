//! Submitter: enqueue a job and wait for its result.
//!
//! # Flow
//! 1. Allocate a `JobId` and build the envelope.
//! 2. `QueueTransport::enqueue` (errors propagate, no retry here).
//! 3. Poll `ResultStore::try_fetch` every `poll_interval` until the deadline.
//! 4. On a hit, `delete` the record and return its outcome.
//!
//! Polling is the only synchronization between submitter and worker; the
//! interval trades latency against load on the store.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::domain::{CourierError, JobEnvelope, JobId, JobState, Outcome, ResultRecord, RetryPolicy};
use crate::ports::{IdGenerator, QueueTransport, ResultStore, SystemClock, UlidGenerator};

#[derive(Debug, Clone)]
pub struct WaiterConfig {
    /// Delay between polls while no result is present.
    pub poll_interval: Duration,

    /// Backoff applied when a poll itself fails.
    pub retry: RetryPolicy,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            retry: RetryPolicy::default(),
        }
    }
}

/// Client-side half of the protocol.
pub struct Submitter {
    transport: Arc<dyn QueueTransport>,
    store: Arc<dyn ResultStore>,
    ids: Arc<dyn IdGenerator>,
    config: WaiterConfig,
}

impl Submitter {
    pub fn new(transport: Arc<dyn QueueTransport>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            transport,
            store,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            config: WaiterConfig::default(),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_config(mut self, config: WaiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Enqueue `payload` under a fresh job id.
    pub async fn submit(&self, payload: serde_json::Value) -> Result<JobId, CourierError> {
        let envelope = JobEnvelope::new(self.ids.generate_job_id(), payload);
        self.transport.enqueue(&envelope).await?;
        tracing::debug!(job_id = %envelope.job_id(), state = %JobState::Queued, "job submitted");
        Ok(envelope.job_id())
    }

    /// Wait up to `timeout` for the result of `job_id`, then consume it.
    ///
    /// On [`CourierError::Timeout`] the job is not cancelled; if a worker
    /// publishes later, that record is orphaned until the store expires it.
    /// A zero `timeout` never polls.
    pub async fn wait_for(&self, job_id: JobId, timeout: Duration) -> Result<Outcome, CourierError> {
        let started = Instant::now();
        // The deadline bounds fetching only; a record already in hand is consumed.
        let polled = if timeout.is_zero() {
            None
        } else {
            tokio::time::timeout(timeout, self.poll(job_id)).await.ok()
        };

        match polled {
            Some(record) => self.consume(job_id, record?).await,
            None => {
                let waited = started.elapsed();
                tracing::warn!(
                    %job_id,
                    ?waited,
                    state = %JobState::Orphaned,
                    "gave up waiting for result"
                );
                Err(CourierError::Timeout { job_id, waited })
            }
        }
    }

    pub async fn submit_and_wait(
        &self,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<Outcome, CourierError> {
        let job_id = self.submit(payload).await?;
        self.wait_for(job_id, timeout).await
    }

    /// Like [`Submitter::submit_and_wait`], decoding the success value into `T`.
    /// A failed outcome becomes [`CourierError::WorkerProcessingFailure`].
    pub async fn submit_and_wait_as<T: DeserializeOwned>(
        &self,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, CourierError> {
        let job_id = self.submit(payload).await?;
        self.wait_for(job_id, timeout).await?.into_typed(job_id)
    }

    async fn poll(&self, job_id: JobId) -> Result<ResultRecord, CourierError> {
        let mut failures = 0u32;
        loop {
            match self.store.try_fetch(&job_id).await {
                Ok(Some(record)) => return Ok(record),
                Ok(None) => {
                    failures = 0;
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    let delay = self
                        .config
                        .retry
                        .next_delay(failures)
                        .max(self.config.poll_interval);
                    tracing::warn!(%job_id, error = %err, attempt = failures, ?delay, "result poll failed");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn consume(&self, job_id: JobId, record: ResultRecord) -> Result<Outcome, CourierError> {
        if record.job_id != job_id {
            return Err(CourierError::CorrelationMismatch {
                expected: job_id,
                found: record.job_id,
            });
        }

        // The outcome is already in hand; a leftover record only lives until its TTL.
        if let Err(err) = self.store.delete(&job_id).await {
            tracing::warn!(%job_id, error = %err, "failed to delete consumed result");
        }
        let state = JobState::Published.advance(JobState::Consumed, job_id);
        tracing::debug!(%job_id, %state, "result consumed");
        Ok(record.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryBackend;
    use serde_json::json;

    fn submitter(backend: &InMemoryBackend) -> Submitter {
        Submitter::new(Arc::new(backend.clone()), Arc::new(backend.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_outcome_published_for_its_job() {
        let backend = InMemoryBackend::new();
        let sub = submitter(&backend);

        let job_id = sub.submit(json!("cat.jpg")).await.unwrap();
        backend
            .publish(&ResultRecord::new(job_id, Outcome::success(json!("tabby_cat"))))
            .await
            .unwrap();

        let outcome = sub.wait_for(job_id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, Outcome::success(json!("tabby_cat")));
        assert!(backend.try_fetch(&job_id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_a_worker() {
        let backend = InMemoryBackend::new();
        let sub = submitter(&backend);
        let start = Instant::now();

        let err = sub
            .submit_and_wait(json!("dog.jpg"), Duration::from_millis(300))
            .await
            .unwrap_err();

        assert!(matches!(err, CourierError::Timeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(300));
        // the envelope is still queued for a worker that may come later
        assert_eq!(backend.stats().await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn enqueue_failure_propagates() {
        struct DownTransport;

        #[async_trait::async_trait]
        impl QueueTransport for DownTransport {
            async fn enqueue(&self, _: &JobEnvelope) -> Result<(), CourierError> {
                Err(CourierError::transport("connection refused"))
            }
            async fn dequeue(&self, _: Duration) -> Result<Option<crate::ports::Claim>, CourierError> {
                Err(CourierError::transport("connection refused"))
            }
            async fn ack(&self, _: &crate::ports::Claim) -> Result<(), CourierError> {
                Ok(())
            }
            async fn requeue_expired(&self, _: Duration) -> Result<usize, CourierError> {
                Ok(0)
            }
            async fn stats(&self) -> Result<crate::ports::QueueStats, CourierError> {
                Ok(Default::default())
            }
        }

        let sub = Submitter::new(Arc::new(DownTransport), Arc::new(InMemoryBackend::new()));
        let err = sub
            .submit_and_wait(json!("x"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::TransportUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_record_is_rejected() {
        let backend = InMemoryBackend::new();
        let sub = submitter(&backend);
        let job_id = sub.submit(json!(1)).await.unwrap();
        let other = sub.submit(json!(2)).await.unwrap();

        let err = sub
            .consume(job_id, ResultRecord::new(other, Outcome::success(json!(2))))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CourierError::CorrelationMismatch { expected, found } if expected == job_id && found == other
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fetched_record_is_returned_even_if_delete_outlasts_the_deadline() {
        /// Delegates, but `delete` takes longer than any caller is willing to wait.
        struct SlowDelete(InMemoryBackend);

        #[async_trait::async_trait]
        impl ResultStore for SlowDelete {
            async fn publish(&self, record: &ResultRecord) -> Result<(), CourierError> {
                self.0.publish(record).await
            }
            async fn try_fetch(&self, job_id: &JobId) -> Result<Option<ResultRecord>, CourierError> {
                self.0.try_fetch(job_id).await
            }
            async fn delete(&self, job_id: &JobId) -> Result<bool, CourierError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                self.0.delete(job_id).await
            }
            async fn len(&self) -> Result<usize, CourierError> {
                self.0.len().await
            }
        }

        let backend = InMemoryBackend::new();
        let sub = Submitter::new(
            Arc::new(backend.clone()),
            Arc::new(SlowDelete(backend.clone())),
        );
        let job_id = sub.submit(json!("cat.jpg")).await.unwrap();
        backend
            .publish(&ResultRecord::new(job_id, Outcome::success(json!("tabby_cat"))))
            .await
            .unwrap();

        let outcome = sub.wait_for(job_id, Duration::from_secs(1)).await.unwrap();

        assert_eq!(outcome, Outcome::success(json!("tabby_cat")));
        assert!(backend.try_fetch(&job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_ids_come_from_the_configured_generator() {
        let at = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let backend = InMemoryBackend::new();
        let sub = submitter(&backend)
            .with_id_generator(Arc::new(UlidGenerator::new(crate::ports::FixedClock::new(at))));

        let first = sub.submit(json!("a.jpg")).await.unwrap();
        let second = sub.submit(json!("b.jpg")).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(first.timestamp_ms(), at.timestamp_millis() as u64);
        assert_eq!(second.timestamp_ms(), at.timestamp_millis() as u64);
        let claim = backend.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(claim.job_id(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn typed_wait_maps_failure() {
        let backend = InMemoryBackend::new();
        let sub = submitter(&backend);

        let job_id = sub.submit(json!("missing.jpg")).await.unwrap();
        backend
            .publish(&ResultRecord::new(job_id, Outcome::failed("image not found")))
            .await
            .unwrap();

        let err = sub
            .wait_for(job_id, Duration::from_secs(1))
            .await
            .unwrap()
            .into_typed::<String>(job_id)
            .unwrap_err();
        assert!(matches!(err, CourierError::WorkerProcessingFailure { .. }));
    }
}
