//! Named, time-bounded leases used for scheduler leadership.
//!
//! A lease is a store key holding the owner token with a TTL. Acquisition is
//! a single check-and-set procedure, so two simultaneous acquirers can never
//! both win. Leases are a throughput optimisation for the scheduler, not a
//! guard for message operations.

use crate::config::LockConfig;
use crate::error::{DeserializationError, LockError};
use crate::procedure::{integer_reply, Procedure, ProcedureRunner, Procedures};
use crate::store::ProcedureReply;
use std::time::Duration;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;

/// Grants and releases leases on behalf of one owner identity
#[derive(Clone)]
pub struct LockService {
    runner: ProcedureRunner,
    config: LockConfig,
    owner: String,
}

impl LockService {
    /// Create a lock service with a fresh owner identity (`{pid}:{uuid}`)
    pub fn new(runner: ProcedureRunner, config: LockConfig) -> Self {
        let owner = format!("{}:{}", std::process::id(), uuid::Uuid::new_v4());
        Self::with_owner(runner, config, owner)
    }

    pub fn with_owner(runner: ProcedureRunner, config: LockConfig, owner: String) -> Self {
        Self {
            runner,
            config,
            owner,
        }
    }

    /// Identity written into every lease this service acquires
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Store key for a lock name
    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.config.prefix, name)
    }

    /// Take the lease if nobody holds a live one.
    ///
    /// Returns `Ok(false)` when another owner holds it; that is contention,
    /// not an error.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn acquire(&self, name: &str, lease: Duration) -> Result<bool, LockError> {
        let lease_ms = lease.as_millis().max(1);
        let keys = [self.key(name)];
        let args = [lease_ms.to_string(), self.owner.clone()];

        let reply = self
            .runner
            .run(&Procedures::get().acquire_lock, &keys, &args)
            .await
            .map_err(|source| LockError::Acquire {
                name: name.to_string(),
                source,
            })?;

        let acquired = flag_reply(name, &Procedures::get().acquire_lock, &reply)?;
        debug!(lease_ms = lease_ms as u64, acquired, "Lock acquisition attempted");
        Ok(acquired)
    }

    /// Take the lease for the configured default duration
    pub async fn acquire_default(&self, name: &str) -> Result<bool, LockError> {
        self.acquire(name, self.config.default_lease()).await
    }

    /// Delete the lease whoever holds it.
    ///
    /// Ownership is not checked: a late release from a stale leader can drop
    /// a lease a newer leader just took. The scheduler tolerates that because
    /// its scans are idempotent; use [`LockService::release_if_owner`] where it
    /// matters.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn release(&self, name: &str) -> Result<(), LockError> {
        self.runner
            .run(&Procedures::get().release_lock, &[self.key(name)], &[])
            .await
            .map_err(|source| LockError::Release {
                name: name.to_string(),
                source,
            })?;

        debug!("Lock released");
        Ok(())
    }

    /// Delete the lease only if this service still owns it.
    ///
    /// Returns whether a lease was deleted.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn release_if_owner(&self, name: &str) -> Result<bool, LockError> {
        let reply = self
            .runner
            .run(
                &Procedures::get().release_lock_if_owner,
                &[self.key(name)],
                &[self.owner.clone()],
            )
            .await
            .map_err(|source| LockError::Release {
                name: name.to_string(),
                source,
            })?;

        let released = flag_reply(name, &Procedures::get().release_lock_if_owner, &reply)?;
        debug!(released, "Conditional lock release attempted");
        Ok(released)
    }
}

/// Interpret a 0/1 lock reply; anything else is an error, not contention
fn flag_reply(
    name: &str,
    procedure: &Procedure,
    reply: &ProcedureReply,
) -> Result<bool, LockError> {
    let unusable = |source| LockError::Reply {
        name: name.to_string(),
        source,
    };

    match integer_reply(procedure, reply).map_err(unusable)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(unusable(DeserializationError::UnexpectedShape {
            procedure: procedure.name().to_string(),
            expected: "0 or 1",
        })),
    }
}
