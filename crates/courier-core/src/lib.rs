//! courier-core
//!
//! Asynchronous job dispatch with result correlation: a submitter enqueues a
//! job and waits, bounded by a deadline, for the result a worker publishes
//! under the same job id.
//!
//! # Modules
//! - **domain**: job ids, envelope, outcome, lifecycle states, errors, retry policy
//! - **ports**: `QueueTransport`, `ResultStore`, `Clock`, `IdGenerator`
//! - **app**: submitter, worker loop and pool, reaper, status
//! - **impls**: in-memory and Redis backends
//! - **config**: environment-driven settings
//! - **classify**: image classification payload and result shapes

pub mod app;
pub mod classify;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    Handler, ProcessError, Processor, ReaperLoop, StatusReport, Submitter, Typed, WaiterConfig,
    WorkerConfig, WorkerLoop, WorkerPool,
};
pub use config::{ConfigError, CourierConfig};
pub use domain::{CourierError, ErrorKind, JobEnvelope, JobId, JobState, Outcome, ResultRecord};
pub use impls::{InMemoryBackend, RedisBackend};
pub use ports::{QueueTransport, ResultStore};
