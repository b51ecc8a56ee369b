//! ReaperLoop: re-deliver claims whose worker never acked.
//!
//! A worker that dies between dequeue and ack leaves its envelope in the
//! processing list. Every `interval` the reaper moves claims older than
//! `visibility_timeout` back to the head of the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{CourierError, JobState};
use crate::ports::QueueTransport;

pub struct ReaperLoop {
    transport: Arc<dyn QueueTransport>,
    visibility_timeout: Duration,
    interval: Duration,
}

impl ReaperLoop {
    /// Sweeps every quarter of `visibility_timeout` unless overridden.
    pub fn new(transport: Arc<dyn QueueTransport>, visibility_timeout: Duration) -> Self {
        Self {
            transport,
            visibility_timeout,
            interval: (visibility_timeout / 4).max(Duration::from_millis(100)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One sweep. Returns how many claims were re-delivered.
    pub async fn run_once(&self) -> Result<usize, CourierError> {
        let requeued = self.transport.requeue_expired(self.visibility_timeout).await?;
        if requeued > 0 {
            tracing::warn!(
                requeued,
                state = %JobState::Queued,
                visibility_timeout = ?self.visibility_timeout,
                "re-delivered expired claims"
            );
        }
        Ok(requeued)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.interval, "reaper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "reaper sweep failed");
                    }
                }
            }
        }
        tracing::info!("reaper stopped");
    }
}
