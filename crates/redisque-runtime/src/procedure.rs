//! Content-addressed store procedures and the runner that executes them.

use crate::error::{DeserializationError, QueueError, StoreError};
use crate::store::{ProcedureReply, ScriptStore};
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "procedure_tests.rs"]
mod tests;

/// A named procedure body together with its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    name: &'static str,
    source: &'static str,
    sha: String,
}

impl Procedure {
    pub fn new(name: &'static str, source: &'static str) -> Self {
        let sha = hex::encode(Sha1::digest(source.as_bytes()));
        Self { name, source, sha }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Hex SHA-1 of the body, the key the store caches it under
    pub fn sha(&self) -> &str {
        &self.sha
    }
}

/// Every procedure the queue, scheduler and lock service issue
#[derive(Debug)]
pub struct Procedures {
    pub put_messages: Procedure,
    pub checkout_messages: Procedure,
    pub remove_message: Procedure,
    pub release_message: Procedure,
    pub queue_stats: Procedure,
    pub promote_scheduled: Procedure,
    pub reclaim_timed_out: Procedure,
    pub acquire_lock: Procedure,
    pub release_lock: Procedure,
    pub release_lock_if_owner: Procedure,
}

impl Procedures {
    pub fn get() -> &'static Procedures {
        static PROCEDURES: OnceLock<Procedures> = OnceLock::new();
        PROCEDURES.get_or_init(|| Procedures {
            put_messages: Procedure::new(
                "put_messages",
                include_str!("scripts/put_messages.lua"),
            ),
            checkout_messages: Procedure::new(
                "checkout_messages",
                include_str!("scripts/checkout_messages.lua"),
            ),
            remove_message: Procedure::new(
                "remove_message",
                include_str!("scripts/remove_message.lua"),
            ),
            release_message: Procedure::new(
                "release_message",
                include_str!("scripts/release_message.lua"),
            ),
            queue_stats: Procedure::new("queue_stats", include_str!("scripts/queue_stats.lua")),
            promote_scheduled: Procedure::new(
                "promote_scheduled",
                include_str!("scripts/promote_scheduled.lua"),
            ),
            reclaim_timed_out: Procedure::new(
                "reclaim_timed_out",
                include_str!("scripts/reclaim_timed_out.lua"),
            ),
            acquire_lock: Procedure::new("acquire_lock", include_str!("scripts/acquire_lock.lua")),
            release_lock: Procedure::new("release_lock", include_str!("scripts/release_lock.lua")),
            release_lock_if_owner: Procedure::new(
                "release_lock_if_owner",
                include_str!("scripts/release_lock_if_owner.lua"),
            ),
        })
    }
}

/// Executes procedures against a [`ScriptStore`], hiding script-cache misses
#[derive(Clone)]
pub struct ProcedureRunner {
    store: Arc<dyn ScriptStore>,
}

impl ProcedureRunner {
    pub fn new(store: Arc<dyn ScriptStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ScriptStore> {
        &self.store
    }

    /// Run a procedure by hash, resubmitting the full body once if the store
    /// has not cached it yet
    #[instrument(skip(self, keys, args), fields(procedure = procedure.name(), backend = self.store.backend()))]
    pub async fn run(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        match self.store.eval_sha(procedure.sha(), keys, args).await {
            Err(StoreError::NoScript { .. }) => {
                debug!(sha = procedure.sha(), "Procedure not cached; submitting body");
                self.store.eval(procedure, keys, args).await
            }
            other => other,
        }
    }

    /// Run a procedure whose reply is an integer
    pub async fn run_integer(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, QueueError> {
        let reply = self.run(procedure, keys, args).await?;
        Ok(integer_reply(procedure, &reply)?)
    }

    /// Run a procedure whose reply is a JSON document
    pub async fn run_json<T: DeserializeOwned>(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> Result<T, QueueError> {
        let reply = self.run(procedure, keys, args).await?;
        let text = reply
            .as_text()
            .ok_or_else(|| DeserializationError::UnexpectedShape {
                procedure: procedure.name().to_string(),
                expected: "JSON text",
            })?;

        serde_json::from_str(text).map_err(|source| {
            QueueError::Deserialization(DeserializationError::Malformed {
                procedure: procedure.name().to_string(),
                source,
            })
        })
    }
}

/// Read an integer reply of `procedure`
pub fn integer_reply(
    procedure: &Procedure,
    reply: &ProcedureReply,
) -> Result<i64, DeserializationError> {
    reply
        .as_integer()
        .ok_or_else(|| DeserializationError::UnexpectedShape {
            procedure: procedure.name().to_string(),
            expected: "integer",
        })
}
