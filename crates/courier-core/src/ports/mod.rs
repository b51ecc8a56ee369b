//! Ports: the seams between the dispatch logic and the backing store.
//!
//! The waiter and the worker loop only see these traits, so the Redis backend
//! can be swapped for the in-memory one (or a test double) without touching
//! them.

pub mod clock;
pub mod id_generator;
pub mod queue_transport;
pub mod result_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_transport::{Claim, QueueStats, QueueTransport};
pub use self::result_store::ResultStore;
