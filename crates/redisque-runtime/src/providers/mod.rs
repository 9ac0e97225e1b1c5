//! Store implementations.
//!
//! This module contains concrete implementations of the `ScriptStore` trait
//! for different backends.

pub mod memory;
pub mod redis_store;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;
