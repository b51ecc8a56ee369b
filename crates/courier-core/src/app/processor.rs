//! Processor: the work function a worker runs for each job.
//!
//! Two layers:
//! - **`Handler`**: typed input/output, what collaborators implement.
//! - **`Processor`**: object-safe JSON-in/JSON-out, what the worker loop holds.
//!
//! `Typed<H>` erases a `Handler` into a `Processor`.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure reported by a processor. Always turned into `Outcome::Failed`.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("input not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl ProcessError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Object-safe work function.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(&self, payload: serde_json::Value) -> Result<serde_json::Value, ProcessError>;
}

/// Typed work function.
///
/// ```ignore
/// struct Classifier;
///
/// #[async_trait]
/// impl Handler for Classifier {
///     type Input = ImageJob;
///     type Output = Prediction;
///
///     async fn handle(&self, job: ImageJob) -> Result<Prediction, ProcessError> {
///         Ok(Prediction::new("tabby_cat", 0.92))
///     }
/// }
///
/// let processor = Typed::new(Classifier);
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn handle(&self, input: Self::Input) -> Result<Self::Output, ProcessError>;
}

/// Adapts a [`Handler`] to [`Processor`].
pub struct Typed<H> {
    handler: H,
}

impl<H: Handler> Typed<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: Handler> Processor for Typed<H> {
    async fn process(&self, payload: serde_json::Value) -> Result<serde_json::Value, ProcessError> {
        let input: H::Input = serde_json::from_value(payload)
            .map_err(|e| ProcessError::InvalidPayload(e.to_string()))?;
        let output = self.handler.handle(input).await?;
        serde_json::to_value(output).map_err(|e| ProcessError::failed(format!("json encode: {e}")))
    }
}
