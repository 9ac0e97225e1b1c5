//! Configuration for the store connection, queue defaults, scheduler and locks.

use crate::error::ConfigurationError;
use crate::message::MAX_TIMEOUT_SECONDS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
///
/// Every field carries a serde default, so an empty file or an unconfigured
/// environment yields a usable configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisqueConfig {
    pub store: StoreConfig,
    pub queue: QueueDefaults,
    pub scheduler: SchedulerConfig,
    pub lock: LockConfig,
}

impl RedisqueConfig {
    /// Load configuration from an optional file, then `REDISQUE__`-prefixed
    /// environment variables (e.g. `REDISQUE__STORE__PORT=6380`)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix("REDISQUE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the queue or scheduler cannot operate with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |message: &str| {
            Err(ConfigurationError::Invalid {
                message: message.to_string(),
            })
        };

        if self.store.host.is_empty() {
            return invalid("store.host must not be empty");
        }
        if self.queue.timeout_seconds == 0 || self.queue.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return invalid("queue.timeout_seconds must be between 1 second and one year");
        }
        if self.queue.messages_per_call == 0 {
            return invalid("queue.messages_per_call must be at least 1");
        }
        if self.scheduler.initial_backoff_ms == 0 {
            return invalid("scheduler.initial_backoff_ms must be at least 1");
        }
        if self.scheduler.max_backoff_ms < self.scheduler.initial_backoff_ms {
            return invalid("scheduler.max_backoff_ms must not be below initial_backoff_ms");
        }
        if self.scheduler.promote_interval_ms == 0 || self.scheduler.reclaim_interval_ms == 0 {
            return invalid("scheduler polling intervals must be at least 1ms");
        }
        if self.lock.default_lease_ms == 0 {
            return invalid("lock.default_lease_ms must be at least 1");
        }

        Ok(())
    }
}

/// Store endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    /// Logical Redis database
    pub database: i64,
}

impl StoreConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.database)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            database: 1,
        }
    }
}

/// Defaults applied to every message of a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    /// Visibility timeout in seconds
    pub timeout_seconds: u64,
    /// Messages claimed by a checkout when no count is given
    pub messages_per_call: u32,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            messages_per_call: 1,
        }
    }
}

/// Timing and lock names of the scheduler loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub promote_interval_ms: u64,
    pub reclaim_interval_ms: u64,
    pub scheduler_lock: String,
    pub timeout_lock: String,
}

impl SchedulerConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn promote_interval(&self) -> Duration {
        Duration::from_millis(self.promote_interval_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            promote_interval_ms: 1_000,
            reclaim_interval_ms: 2_000,
            scheduler_lock: "scheduler_lock".to_string(),
            timeout_lock: "timeout_lock".to_string(),
        }
    }
}

/// Lock namespace and default lease
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub prefix: String,
    pub default_lease_ms: u64,
}

impl LockConfig {
    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            prefix: "locks:".to_string(),
            default_lease_ms: 60_000,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
