//! Store abstraction: anything that can execute a named, atomic procedure.
//!
//! Every queue transition, every scheduler scan and every lease operation is
//! a single procedure invocation, so the store is the only place where
//! concurrent callers are serialised.

use crate::error::StoreError;
use crate::procedure::Procedure;
use async_trait::async_trait;

/// Result value of a procedure invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureReply {
    Nil,
    Integer(i64),
    Text(String),
    List(Vec<ProcedureReply>),
}

impl ProcedureReply {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Text(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Interface implemented by store backends (Redis, in-memory)
///
/// Mirrors the `EVALSHA`/`EVAL` pair: callers first try the content hash and
/// only ship the full body when the store reports [`StoreError::NoScript`].
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Execute a procedure the store already has cached under `sha`
    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError>;

    /// Execute a procedure from its full body, caching it as a side effect
    async fn eval(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError>;

    /// Short backend name used in logs
    fn backend(&self) -> &'static str;
}
