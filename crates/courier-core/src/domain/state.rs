//! Per-job lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Where a job is in its lifecycle.
///
/// State transitions:
/// - Queued -> Claimed -> Processed -> Published -> Consumed
/// - Queued -> Claimed -> Processed -> Published -> Orphaned (waiter timed out)
/// - Claimed -> Queued (claim expired and the reaper re-delivered it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Envelope is in the queue.
    Queued,

    /// A worker removed the envelope and holds the claim.
    Claimed,

    /// The processor returned (success or failure).
    Processed,

    /// The result record is in the store.
    Published,

    /// The submitter read and deleted the record.
    Consumed,

    /// The submitter gave up before the record was consumed.
    Orphaned,
}

impl JobState {
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Claimed)
                | (Claimed, Processed)
                | (Claimed, Queued)
                | (Processed, Published)
                | (Published, Consumed)
                | (Published, Orphaned)
        )
    }

    /// Move to `next`. An edge `can_transition_to` rejects is logged, not refused:
    /// the state is only a log field.
    pub fn advance(self, next: JobState, job_id: JobId) -> JobState {
        if !self.can_transition_to(next) {
            tracing::warn!(%job_id, from = %self, to = %next, "unexpected job state transition");
        }
        next
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Claimed => "claimed",
            JobState::Processed => "processed",
            JobState::Published => "published",
            JobState::Consumed => "consumed",
            JobState::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
