//! App: wires the ports into the running system.
//!
//! # Components
//! - **Submitter**: enqueue a job and wait for its result
//! - **WorkerLoop**: dequeue → process → publish → ack
//! - **WorkerPool**: N worker loops with shared shutdown
//! - **ReaperLoop**: re-delivery of expired claims
//! - **StatusReport**: queue and store counts

pub mod pool;
pub mod processor;
pub mod reaper_loop;
pub mod status;
pub mod waiter;
pub mod worker_loop;

pub use self::pool::WorkerPool;
pub use self::processor::{Handler, ProcessError, Processor, Typed};
pub use self::reaper_loop::ReaperLoop;
pub use self::status::StatusReport;
pub use self::waiter::{Submitter, WaiterConfig};
pub use self::worker_loop::{WorkerConfig, WorkerLoop};
