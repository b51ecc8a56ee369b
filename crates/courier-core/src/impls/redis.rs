//! RedisBackend: queue transport and result store shared between processes.
//!
//! # Key Schema
//!
//! | Key | Type | Purpose |
//! |-----|------|---------|
//! | `{queue}` | List | Pending envelopes. `LPUSH` at the tail, popped from the right. |
//! | `{queue}:processing` | List | Claimed envelopes awaiting ack, as `{token}:{envelope}`. |
//! | `{queue}:claims` | Sorted Set | Claim time (epoch ms) per processing member. |
//! | `{queue}:result:{job_id}` | String | Encoded `ResultRecord`, written with `SET NX`. |
//!
//! Claiming is `BLMOVE {queue} {queue}:processing RIGHT LEFT`, so an envelope
//! is never in neither list. The moved entry is then swapped for a member
//! tagged with the delivery token, so `ack` removes exactly its own delivery.
//! Tagging and reaping each run as one Lua script.
//!
//! Blocking pops use dedicated synchronous connections on the blocking thread
//! pool; everything else goes through one multiplexed async connection, which
//! a blocking command would otherwise stall.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ::redis::aio::MultiplexedConnection;
use ::redis::Script;
use ulid::Ulid;

use crate::domain::{CourierError, JobEnvelope, JobId, ResultRecord};
use crate::ports::{Claim, QueueStats, QueueTransport, ResultStore};

/// Replace a freshly moved envelope with its token-tagged member.
///
/// KEYS[1] = processing list, KEYS[2] = claims zset.
/// ARGV[1] = envelope, ARGV[2] = tagged member, ARGV[3] = now (epoch ms).
/// Returns: 1 if tagged, 0 if the reaper already took the envelope back.
const LUA_TAG_CLAIM: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('LPUSH', KEYS[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
return 1
"#;

/// Return expired claims to the head of the queue.
///
/// KEYS[1] = processing list, KEYS[2] = claims zset, KEYS[3] = queue list.
/// ARGV[1] = now (epoch ms), ARGV[2] = visibility timeout (ms).
/// Untagged members (the worker died between `BLMOVE` and tagging) are
/// stamped with `now` so they expire one timeout later. Tagged members are
/// re-queued without their `{token}:` prefix (26-char ULID plus colon).
/// Returns: number of envelopes re-delivered.
const LUA_REQUEUE_EXPIRED: &str = r#"
local now = tonumber(ARGV[1])
local cutoff = now - tonumber(ARGV[2])
local requeued = 0
local members = redis.call('LRANGE', KEYS[1], 0, -1)
for _, member in ipairs(members) do
    local claimed_at = redis.call('ZSCORE', KEYS[2], member)
    if not claimed_at then
        redis.call('ZADD', KEYS[2], now, member)
    elseif tonumber(claimed_at) <= cutoff then
        local envelope = member
        if string.byte(member, 1) ~= 123 then
            envelope = string.sub(member, 28)
        end
        redis.call('LREM', KEYS[1], 1, member)
        redis.call('ZREM', KEYS[2], member)
        redis.call('RPUSH', KEYS[3], envelope)
        requeued = requeued + 1
    end
end
return requeued
"#;

/// Redis key names derived from the queue name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    queue: String,
}

impl RedisKeys {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn processing(&self) -> String {
        format!("{}:processing", self.queue)
    }

    pub fn claims(&self) -> String {
        format!("{}:claims", self.queue)
    }

    pub fn result(&self, job_id: &JobId) -> String {
        format!("{}:result:{}", self.queue, job_id)
    }

    pub fn result_pattern(&self) -> String {
        format!("{}:result:*", self.queue)
    }
}

/// Redis-backed transport and store.
///
/// Clones share the multiplexed connection and the idle blocking connections.
#[derive(Clone)]
pub struct RedisBackend {
    client: ::redis::Client,
    conn: MultiplexedConnection,
    /// Idle synchronous connections for `BLMOVE`, one per concurrent pop.
    blocking: Arc<Mutex<Vec<::redis::Connection>>>,
    keys: RedisKeys,
    result_ttl: Option<Duration>,
}

impl RedisBackend {
    /// Connect to `url` (`redis://host:port/db`). Fails fast if Redis is unreachable.
    pub async fn connect(url: &str, queue: impl Into<String>) -> Result<Self, CourierError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| CourierError::transport_with_source("failed to create Redis client", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CourierError::transport_with_source("failed to connect to Redis", e))?;
        tracing::debug!(url, "connected to redis");
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
            keys: RedisKeys::new(queue),
            result_ttl: None,
        })
    }

    /// Expire published results after `ttl` (orphans included).
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    /// `BLMOVE` on a dedicated connection; `LMOVE` when `wait` is zero
    /// (a zero `BLMOVE` timeout would block forever).
    async fn claim_raw(&self, wait: Duration) -> Result<Option<Vec<u8>>, CourierError> {
        let client = self.client.clone();
        let idle = Arc::clone(&self.blocking);
        let queue = self.keys.queue().to_string();
        let processing = self.keys.processing();

        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, CourierError> {
            let pooled = idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
            let mut conn = match pooled {
                Some(conn) => conn,
                None => client
                    .get_connection()
                    .map_err(|e| map_redis_error(e, "connect"))?,
            };

            let mut cmd = if wait.is_zero() {
                ::redis::cmd("LMOVE")
            } else {
                ::redis::cmd("BLMOVE")
            };
            cmd.arg(&queue).arg(&processing).arg("RIGHT").arg("LEFT");
            if !wait.is_zero() {
                cmd.arg(wait.as_secs_f64());
            }

            // a connection that errored is dropped instead of returned to the pool
            let raw: Option<Vec<u8>> = cmd
                .query(&mut conn)
                .map_err(|e| map_redis_error(e, "BLMOVE"))?;
            idle.lock().unwrap_or_else(PoisonError::into_inner).push(conn);
            Ok(raw)
        })
        .await
        .map_err(|e| CourierError::transport_with_source("blocking pop task failed", e))?
    }
}

/// `{token}:{envelope}`. Envelopes are JSON objects, so a member never
/// starts with `{` once tagged.
fn claim_member(token: Ulid, raw: &[u8]) -> Vec<u8> {
    let token = token.to_string();
    let mut member = Vec::with_capacity(token.len() + 1 + raw.len());
    member.extend_from_slice(token.as_bytes());
    member.push(b':');
    member.extend_from_slice(raw);
    member
}

fn map_redis_error(err: ::redis::RedisError, op: &str) -> CourierError {
    CourierError::transport_with_source(format!("redis {op} failed: {err}"), err)
}

#[async_trait]
impl QueueTransport for RedisBackend {
    async fn enqueue(&self, envelope: &JobEnvelope) -> Result<(), CourierError> {
        let raw = envelope.encode()?;
        let _: i64 = ::redis::cmd("LPUSH")
            .arg(self.keys.queue())
            .arg(raw)
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "LPUSH"))?;
        tracing::trace!(job_id = %envelope.job_id(), "enqueued");
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Claim>, CourierError> {
        let Some(raw) = self.claim_raw(wait).await? else {
            return Ok(None);
        };

        let envelope = match JobEnvelope::decode(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                let _: i64 = ::redis::cmd("LREM")
                    .arg(self.keys.processing())
                    .arg(1)
                    .arg(&raw)
                    .query_async(&mut self.conn.clone())
                    .await
                    .map_err(|e| map_redis_error(e, "LREM"))?;
                return Err(err);
            }
        };

        let token = Ulid::new();
        let claimed_at = Utc::now();
        let script = Script::new(LUA_TAG_CLAIM);
        let tagged: i64 = script
            .key(self.keys.processing())
            .key(self.keys.claims())
            .arg(&raw)
            .arg(claim_member(token, &raw))
            .arg(claimed_at.timestamp_millis())
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "tag script"))?;
        if tagged == 0 {
            tracing::warn!(job_id = %envelope.job_id(), "claim re-queued before it was tagged");
            return Ok(None);
        }

        Ok(Some(Claim::new(envelope, raw, token, claimed_at)))
    }

    async fn ack(&self, claim: &Claim) -> Result<(), CourierError> {
        let member = claim_member(claim.token(), claim.raw());
        let _: () = ::redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.keys.processing())
            .arg(1)
            .arg(&member)
            .ignore()
            .cmd("ZREM")
            .arg(self.keys.claims())
            .arg(&member)
            .ignore()
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "ack"))?;
        Ok(())
    }

    async fn requeue_expired(&self, visibility_timeout: Duration) -> Result<usize, CourierError> {
        let script = Script::new(LUA_REQUEUE_EXPIRED);
        let requeued: usize = script
            .key(self.keys.processing())
            .key(self.keys.claims())
            .key(self.keys.queue())
            .arg(Utc::now().timestamp_millis())
            .arg(visibility_timeout.as_millis() as u64)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "requeue script"))?;
        Ok(requeued)
    }

    async fn stats(&self) -> Result<QueueStats, CourierError> {
        let (queued, claimed): (usize, usize) = ::redis::pipe()
            .cmd("LLEN")
            .arg(self.keys.queue())
            .cmd("LLEN")
            .arg(self.keys.processing())
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "LLEN"))?;
        Ok(QueueStats { queued, claimed })
    }
}

#[async_trait]
impl ResultStore for RedisBackend {
    async fn publish(&self, record: &ResultRecord) -> Result<(), CourierError> {
        let bytes = record.encode()?;
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(self.keys.result(&record.job_id)).arg(bytes).arg("NX");
        if let Some(ttl) = self.result_ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }

        let stored: Option<String> = cmd
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "SET"))?;
        match stored {
            Some(_) => Ok(()),
            None => Err(CourierError::DuplicatePublish {
                job_id: record.job_id,
            }),
        }
    }

    async fn try_fetch(&self, job_id: &JobId) -> Result<Option<ResultRecord>, CourierError> {
        let bytes: Option<Vec<u8>> = ::redis::cmd("GET")
            .arg(self.keys.result(job_id))
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "GET"))?;
        bytes.map(|b| ResultRecord::decode(&b)).transpose()
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, CourierError> {
        let removed: i64 = ::redis::cmd("DEL")
            .arg(self.keys.result(job_id))
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, "DEL"))?;
        Ok(removed == 1)
    }

    async fn len(&self) -> Result<usize, CourierError> {
        let pattern = self.keys.result_pattern();
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut count = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(e, "SCAN"))?;
            count += keys.len();
            if next == 0 {
                return Ok(count);
            }
            cursor = next;
        }
    }
}
