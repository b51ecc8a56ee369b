//! Impls: concrete backends for the ports.
//!
//! - **InMemoryBackend**: single-process queue + result store (tests, dev)
//! - **RedisBackend**: shared queue + result store for separate processes

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryBackend;
pub use self::redis::{RedisBackend, RedisKeys};
