//! Outcome model: what a worker publishes for a job.
//!
//! The success value is opaque to the core. A failed job still gets a
//! terminal record (`Outcome::Failed`) so its submitter stops waiting.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::CourierError;
use super::ids::JobId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { value: serde_json::Value },
    Failed { reason: String },
}

impl Outcome {
    pub fn success(value: serde_json::Value) -> Self {
        Self::Success { value }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Decode a success value into `T`; a failure becomes
    /// [`CourierError::WorkerProcessingFailure`].
    pub fn into_typed<T: DeserializeOwned>(self, job_id: JobId) -> Result<T, CourierError> {
        match self {
            Outcome::Success { value } => Ok(serde_json::from_value(value)?),
            Outcome::Failed { reason } => {
                Err(CourierError::WorkerProcessingFailure { job_id, reason })
            }
        }
    }
}

/// The unit written to the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub outcome: Outcome,
    #[serde(default = "Utc::now")]
    pub completed_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(job_id: JobId, outcome: Outcome) -> Self {
        Self {
            job_id,
            outcome,
            completed_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CourierError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CourierError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
