//! ResultStore port: write-once / read-once staging area for results.

use async_trait::async_trait;

use crate::domain::{CourierError, JobId, ResultRecord};

/// Keyed by job id. Single-key operations only.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store a record if no record exists under its job id.
    ///
    /// A second publish for the same job id fails with
    /// [`CourierError::DuplicatePublish`]; the first record is kept.
    async fn publish(&self, record: &ResultRecord) -> Result<(), CourierError>;

    /// Non-blocking read. `Ok(None)` means "not published yet" (or expired).
    async fn try_fetch(&self, job_id: &JobId) -> Result<Option<ResultRecord>, CourierError>;

    /// Returns whether a record was removed.
    async fn delete(&self, job_id: &JobId) -> Result<bool, CourierError>;

    /// Number of records currently held.
    async fn len(&self) -> Result<usize, CourierError>;
}
