//! Redis store executing procedures as Lua scripts via `EVALSHA`/`EVAL`.

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::procedure::Procedure;
use crate::store::{ProcedureReply, ScriptStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::info;

/// Redis-backed store sharing one multiplexed connection across callers
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to the endpoint and logical database named in `config`
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url()).map_err(|e| StoreError::Connection {
            message: e.to_string(),
        })?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection {
                message: e.to_string(),
            })?;

        info!(
            host = %config.host,
            port = config.port,
            database = config.database,
            "Connected to Redis"
        );

        Ok(Self { connection })
    }
}

fn reply_from_value(value: redis::Value) -> ProcedureReply {
    match value {
        redis::Value::Nil => ProcedureReply::Nil,
        redis::Value::Int(value) => ProcedureReply::Integer(value),
        redis::Value::Data(bytes) => {
            ProcedureReply::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::Bulk(values) => {
            ProcedureReply::List(values.into_iter().map(reply_from_value).collect())
        }
        redis::Value::Status(status) => ProcedureReply::Text(status),
        redis::Value::Okay => ProcedureReply::Text("OK".to_string()),
    }
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        let mut connection = self.connection.clone();
        let value: redis::Value = redis::cmd("EVALSHA")
            .arg(sha)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut connection)
            .await?;

        Ok(reply_from_value(value))
    }

    async fn eval(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        let mut connection = self.connection.clone();
        let value: redis::Value = redis::cmd("EVAL")
            .arg(procedure.source())
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut connection)
            .await?;

        Ok(reply_from_value(value))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_replies_are_converted_recursively() {
        let value = redis::Value::Bulk(vec![
            redis::Value::Int(3),
            redis::Value::Data(b"[]".to_vec()),
            redis::Value::Nil,
        ]);

        assert_eq!(
            reply_from_value(value),
            ProcedureReply::List(vec![
                ProcedureReply::Integer(3),
                ProcedureReply::Text("[]".to_string()),
                ProcedureReply::Nil,
            ])
        );
    }

    #[test]
    fn test_status_replies_become_text() {
        assert_eq!(
            reply_from_value(redis::Value::Okay),
            ProcedureReply::Text("OK".to_string())
        );
    }
}
