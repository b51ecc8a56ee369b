//! Status: a point-in-time snapshot of the queue and result store.

use serde::{Deserialize, Serialize};

use crate::domain::CourierError;
use crate::ports::{QueueStats, QueueTransport, ResultStore};

/// Counts only; no per-job history is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Envelopes waiting for a worker.
    pub queued: usize,

    /// Envelopes claimed but not yet acked.
    pub claimed: usize,

    /// Result records not yet consumed (orphans included).
    pub results: usize,
}

impl StatusReport {
    pub async fn collect(
        transport: &dyn QueueTransport,
        store: &dyn ResultStore,
    ) -> Result<Self, CourierError> {
        let QueueStats { queued, claimed } = transport.stats().await?;
        let results = store.len().await?;
        Ok(Self {
            queued,
            claimed,
            results,
        })
    }

    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.claimed == 0
    }
}
