//! InMemoryBackend: queue transport and result store in one process.
//!
//! Used by tests and single-process deployments. The queue holds encoded
//! envelope bytes, so the wire format is exercised exactly as with Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::{CourierError, JobEnvelope, JobId, ResultRecord};
use crate::ports::{Claim, QueueStats, QueueTransport, ResultStore};

/// A claim awaiting ack.
struct InFlight {
    job_id: JobId,
    raw: Vec<u8>,
    claimed_at: Instant,
}

struct StoredResult {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredResult {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct MemoryState {
    /// Tail is the back, head is the front.
    queue: VecDeque<Vec<u8>>,
    /// Keyed by delivery token.
    processing: HashMap<Ulid, InFlight>,
    results: HashMap<JobId, StoredResult>,
}

/// In-process backend.
///
/// Cloning is cheap and clones share state, so one instance can be handed to
/// the submitter and every worker.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    notify: Arc<Notify>,
    result_ttl: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire published results after `ttl` (orphans included).
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl QueueTransport for InMemoryBackend {
    async fn enqueue(&self, envelope: &JobEnvelope) -> Result<(), CourierError> {
        let raw = envelope.encode()?;
        {
            let mut state = self.state.lock().await;
            state.queue.push_back(raw);
        }
        self.notify.notify_one();
        tracing::trace!(job_id = %envelope.job_id(), "enqueued");
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Claim>, CourierError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(raw) = state.queue.pop_front() {
                    // an undecodable entry is dropped here rather than left to block the queue
                    let envelope = JobEnvelope::decode(&raw)?;
                    let token = Ulid::new();
                    state.processing.insert(
                        token,
                        InFlight {
                            job_id: envelope.job_id(),
                            raw: raw.clone(),
                            claimed_at: Instant::now(),
                        },
                    );
                    return Ok(Some(Claim::new(envelope, raw, token, Utc::now())));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // A push between the unlock above and this wait leaves a permit
            // in `notify`, so the wake-up is not lost.
            if tokio::time::timeout(deadline - now, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, claim: &Claim) -> Result<(), CourierError> {
        let mut state = self.state.lock().await;
        if state.processing.remove(&claim.token()).is_none() {
            tracing::debug!(job_id = %claim.job_id(), token = %claim.token(), "ack for a claim that is no longer held");
        }
        Ok(())
    }

    async fn requeue_expired(&self, visibility_timeout: Duration) -> Result<usize, CourierError> {
        let requeued = {
            let mut state = self.state.lock().await;
            let mut expired: Vec<(Ulid, Instant)> = state
                .processing
                .iter()
                .filter(|(_, in_flight)| in_flight.claimed_at.elapsed() >= visibility_timeout)
                .map(|(token, in_flight)| (*token, in_flight.claimed_at))
                .collect();
            // oldest claim ends up at the very head
            expired.sort_by(|a, b| b.1.cmp(&a.1));

            for (token, _) in &expired {
                if let Some(in_flight) = state.processing.remove(token) {
                    tracing::debug!(job_id = %in_flight.job_id, %token, "claim expired");
                    state.queue.push_front(in_flight.raw);
                }
            }
            expired.len()
        };

        for _ in 0..requeued {
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    async fn stats(&self) -> Result<QueueStats, CourierError> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            queued: state.queue.len(),
            claimed: state.processing.len(),
        })
    }
}

#[async_trait]
impl ResultStore for InMemoryBackend {
    async fn publish(&self, record: &ResultRecord) -> Result<(), CourierError> {
        let bytes = record.encode()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(existing) = state.results.get(&record.job_id)
            && !existing.is_expired(now)
        {
            return Err(CourierError::DuplicatePublish {
                job_id: record.job_id,
            });
        }

        state.results.insert(
            record.job_id,
            StoredResult {
                bytes,
                expires_at: self.result_ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn try_fetch(&self, job_id: &JobId) -> Result<Option<ResultRecord>, CourierError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        match state.results.get(job_id) {
            None => Ok(None),
            Some(stored) if stored.is_expired(now) => {
                state.results.remove(job_id);
                Ok(None)
            }
            Some(stored) => Ok(Some(ResultRecord::decode(&stored.bytes)?)),
        }
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, CourierError> {
        let mut state = self.state.lock().await;
        Ok(state.results.remove(job_id).is_some())
    }

    async fn len(&self) -> Result<usize, CourierError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.results.retain(|_, stored| !stored.is_expired(now));
        Ok(state.results.len())
    }
}
