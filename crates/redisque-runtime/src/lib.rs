//! # Redisque Runtime
//!
//! Delayed-delivery job queue over a Redis-compatible store, with a
//! fleet-wide scheduler that promotes delayed messages and reclaims
//! messages whose consumers never acknowledged them.
//!
//! This library provides:
//! - Atomic message lifecycle: enqueue, checkout, acknowledge, release
//! - Delayed delivery and visibility timeouts
//! - Lease-based leadership so one process per fleet runs each scan
//! - Content-addressed store procedures with transparent cache refill
//! - Redis and in-memory stores behind one trait
//!
//! ## Module Organization
//!
//! - [`queue`] - Message lifecycle operations
//! - [`scheduler`] - Promotion and reclaim loops
//! - [`lock`] - Named, time-bounded leases
//! - [`procedure`] - Store procedures and their runner
//! - [`store`] / [`providers`] - Store abstraction and implementations
//! - [`error`] - Error types for all operations

pub mod backoff;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod message;
pub mod procedure;
pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod store;

// Re-export commonly used types at crate root for convenience
pub use backoff::FibonacciBackoff;
pub use client::Redisque;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LockConfig, QueueDefaults, RedisqueConfig, SchedulerConfig, StoreConfig};
pub use error::{
    ConfigurationError, DeserializationError, LockError, QueueError, StoreError, ValidationError,
};
pub use lock::LockService;
pub use message::{
    Delay, EnqueueOptions, Message, MessageId, NewMessage, QueueName, MAX_TIMEOUT_SECONDS,
};
pub use procedure::{Procedure, ProcedureRunner, Procedures};
pub use providers::{InMemoryStore, RedisStore};
pub use queue::{MessageQueue, QueueEvent, QueueStats};
pub use scheduler::{LoopKind, LoopState, Scheduler, SchedulerEvent};
pub use store::{ProcedureReply, ScriptStore};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
