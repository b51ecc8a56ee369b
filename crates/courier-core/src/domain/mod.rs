//! Domain model (ids, envelopes, outcomes, lifecycle, errors).

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod retry;
pub mod state;

pub use envelope::JobEnvelope;
pub use errors::{CourierError, ErrorKind};
pub use ids::JobId;
pub use outcome::{Outcome, ResultRecord};
pub use retry::RetryPolicy;
pub use state::JobState;
