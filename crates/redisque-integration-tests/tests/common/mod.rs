//! Common test utilities for redisque integration tests
//!
//! This module provides:
//! - A clock that follows tokio's pausable time
//! - A recording store wrapper that logs every procedure invocation
//! - A `Fleet` of simulated processes sharing one store

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redisque_runtime::{
    Clock, InMemoryStore, Procedure, ProcedureReply, Procedures, Redisque, RedisqueConfig,
    ScriptStore, StoreError,
};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

// ============================================================================
// Clock
// ============================================================================

/// Wall clock that advances with tokio time, including paused time
pub struct TokioClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            start: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }
}

// ============================================================================
// Recording Store
// ============================================================================

/// Store wrapper that records the name of every procedure it executes
#[derive(Clone)]
pub struct RecordingStore {
    inner: InMemoryStore,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record_sha(&self, sha: &str) {
        let all = Procedures::get();
        let name = [
            &all.put_messages,
            &all.checkout_messages,
            &all.remove_message,
            &all.release_message,
            &all.queue_stats,
            &all.promote_scheduled,
            &all.reclaim_timed_out,
            &all.acquire_lock,
            &all.release_lock,
            &all.release_lock_if_owner,
        ]
        .into_iter()
        .find(|p| p.sha() == sha)
        .map(|p| p.name())
        .unwrap_or("unknown");
        self.calls.lock().unwrap().push(name);
    }
}

#[async_trait]
impl ScriptStore for RecordingStore {
    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        let result = self.inner.eval_sha(sha, keys, args).await;
        // Cache misses are retried with the full body and recorded there.
        if !matches!(result, Err(StoreError::NoScript { .. })) {
            self.record_sha(sha);
        }
        result
    }

    async fn eval(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        self.calls.lock().unwrap().push(procedure.name());
        self.inner.eval(procedure, keys, args).await
    }

    fn backend(&self) -> &'static str {
        "recording"
    }
}

// ============================================================================
// Fleet
// ============================================================================

/// Several simulated processes sharing one store and clock
pub struct Fleet {
    pub store: InMemoryStore,
    pub recorder: RecordingStore,
    pub clock: Arc<dyn Clock>,
}

impl Fleet {
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let store = InMemoryStore::new(Arc::clone(&clock));
        let recorder = RecordingStore::new(store.clone());
        Self {
            store,
            recorder,
            clock,
        }
    }

    /// A new process connected to the shared store
    pub fn process(&self) -> Redisque {
        self.process_with(RedisqueConfig::default())
    }

    pub fn process_with(&self, config: RedisqueConfig) -> Redisque {
        Redisque::with_store(
            Arc::new(self.recorder.clone()),
            Arc::clone(&self.clock),
            config,
        )
    }
}

/// Sleep until `millis` after `start`
#[allow(dead_code)]
pub async fn advance_to(start: Instant, millis: u64) {
    tokio::time::sleep_until(start + std::time::Duration::from_millis(millis)).await;
}
