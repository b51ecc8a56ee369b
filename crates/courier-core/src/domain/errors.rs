//! Error taxonomy for the dispatch core.

use std::time::Duration;

use thiserror::Error;

use super::ids::JobId;

/// Operational classification of a [`CourierError`].
///
/// - `Transient`: the condition may clear on its own (e.g. a wait timed out).
/// - `Permanent`: retrying the same operation cannot help.
/// - `Infrastructure`: the backing store misbehaved; the caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum CourierError {
    /// The queue or result store could not be reached.
    #[error("transport unavailable: {message}")]
    TransportUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The waiter's deadline elapsed before a result was published.
    #[error("timed out after {waited:?} waiting for job {job_id}")]
    Timeout { job_id: JobId, waited: Duration },

    /// A result was already published under this job id. The first record stands.
    #[error("result for job {job_id} was already published")]
    DuplicatePublish { job_id: JobId },

    /// The worker's processor reported a failure for this job.
    #[error("job {job_id} failed in worker: {reason}")]
    WorkerProcessingFailure { job_id: JobId, reason: String },

    #[error("malformed wire data: {0}")]
    Codec(#[from] serde_json::Error),

    /// A record fetched under one key carried another job's id.
    #[error("fetched result for job {found} while waiting for {expected}")]
    CorrelationMismatch { expected: JobId, found: JobId },
}

impl CourierError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::TransportUnavailable { .. } => ErrorKind::Infrastructure,
            CourierError::Timeout { .. } => ErrorKind::Transient,
            CourierError::DuplicatePublish { .. }
            | CourierError::WorkerProcessingFailure { .. }
            | CourierError::Codec(_)
            | CourierError::CorrelationMismatch { .. } => ErrorKind::Permanent,
        }
    }

    /// Whether the caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}
