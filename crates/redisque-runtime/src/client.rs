//! Entry point tying a store, a clock and the configuration together.
//!
//! Queues, lock services and schedulers created from one [`Redisque`] share
//! a single store connection and clock.

use crate::clock::{Clock, SystemClock};
use crate::config::RedisqueConfig;
use crate::error::{QueueError, ValidationError};
use crate::lock::LockService;
use crate::message::QueueName;
use crate::procedure::ProcedureRunner;
use crate::providers::{InMemoryStore, RedisStore};
use crate::queue::MessageQueue;
use crate::scheduler::Scheduler;
use crate::store::ScriptStore;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Factory for queues and schedulers over one store
#[derive(Clone)]
pub struct Redisque {
    runner: ProcedureRunner,
    clock: Arc<dyn Clock>,
    config: RedisqueConfig,
}

impl Redisque {
    /// Connect to the Redis endpoint named in the configuration
    pub async fn connect(config: RedisqueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let store = RedisStore::connect(&config.store).await?;
        Ok(Self::with_store(Arc::new(store), Arc::new(SystemClock), config))
    }

    /// Build over an in-memory store sharing `clock`
    pub fn in_memory(config: RedisqueConfig, clock: Arc<dyn Clock>) -> Self {
        let store = InMemoryStore::new(Arc::clone(&clock));
        Self::with_store(Arc::new(store), clock, config)
    }

    pub fn with_store(
        store: Arc<dyn ScriptStore>,
        clock: Arc<dyn Clock>,
        config: RedisqueConfig,
    ) -> Self {
        info!(backend = store.backend(), "Redisque initialised");
        Self {
            runner: ProcedureRunner::new(store),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RedisqueConfig {
        &self.config
    }

    pub fn runner(&self) -> &ProcedureRunner {
        &self.runner
    }

    /// Handle to a named queue using the configured defaults
    pub fn queue(&self, name: &str) -> Result<MessageQueue, ValidationError> {
        let name = QueueName::new(name.to_string())?;
        Ok(MessageQueue::new(
            name,
            self.runner.clone(),
            Arc::clone(&self.clock),
            self.config.queue.clone(),
        ))
    }

    /// Lock service with a fresh owner identity
    pub fn locks(&self) -> LockService {
        LockService::new(self.runner.clone(), self.config.lock.clone())
    }

    /// Scheduler with its own lease identity; not started
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.runner.clone(),
            self.locks(),
            Arc::clone(&self.clock),
            self.config.scheduler.clone(),
        )
    }
}
