//! QueueTransport port: the ordered hand-off from submitters to workers.
//!
//! Implementations: `InMemoryBackend` (tests, single process) and
//! `RedisBackend` (shared between processes).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::domain::{CourierError, JobEnvelope, JobId};

/// One delivery of an envelope to one worker.
///
/// The claim stays in the transport's processing set until [`QueueTransport::ack`].
/// Claims that are never acked can be returned to the queue by
/// [`QueueTransport::requeue_expired`].
///
/// Every delivery gets a fresh `token`, so acking a claim that already
/// expired never touches a later delivery of the same job.
#[derive(Debug, Clone)]
pub struct Claim {
    envelope: JobEnvelope,
    /// Envelope bytes exactly as stored in the queue.
    raw: Vec<u8>,
    token: Ulid,
    claimed_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(envelope: JobEnvelope, raw: Vec<u8>, token: Ulid, claimed_at: DateTime<Utc>) -> Self {
        Self {
            envelope,
            raw,
            token,
            claimed_at,
        }
    }

    pub fn token(&self) -> Ulid {
        self.token
    }

    pub fn envelope(&self) -> &JobEnvelope {
        &self.envelope
    }

    pub fn job_id(&self) -> JobId {
        self.envelope.job_id()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn claimed_at(&self) -> DateTime<Utc> {
        self.claimed_at
    }

    /// Time between enqueue and this claim. Clock skew between hosts
    /// clamps to zero.
    pub fn queued_for(&self) -> chrono::Duration {
        (self.claimed_at - self.envelope.enqueued_at()).max(chrono::Duration::zero())
    }
}

/// Queue depth as seen by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Envelopes waiting to be claimed.
    pub queued: usize,
    /// Envelopes claimed but not yet acked.
    pub claimed: usize,
}

/// Multi-producer multi-consumer FIFO with claim/ack.
///
/// All operations must be safe to call concurrently from many submitters and
/// workers without external locking.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Append to the tail. Never waits for a consumer.
    async fn enqueue(&self, envelope: &JobEnvelope) -> Result<(), CourierError>;

    /// Claim the head, waiting up to `wait` for one to arrive.
    ///
    /// `Ok(None)` means nothing arrived in time. Callers that want to block
    /// indefinitely call this in a loop.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Claim>, CourierError>;

    /// Drop a finished claim from the processing set.
    ///
    /// Only this delivery is removed; a stale claim (already re-delivered)
    /// is a no-op.
    async fn ack(&self, claim: &Claim) -> Result<(), CourierError>;

    /// Return claims older than `visibility_timeout` to the head of the queue.
    /// Returns how many were re-delivered.
    async fn requeue_expired(&self, visibility_timeout: Duration) -> Result<usize, CourierError>;

    async fn stats(&self) -> Result<QueueStats, CourierError>;
}
