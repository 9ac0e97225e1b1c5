//! In-memory store implementation for testing and development.
//!
//! This module provides a store that:
//! - Keeps hashes, lists, sorted sets, sets and expiring strings in one keyspace
//! - Executes every procedure natively, holding a single mutex for the
//!   duration of the call so each invocation is atomic
//! - Maintains its own procedure cache, answering unknown hashes with
//!   [`StoreError::NoScript`] exactly like Redis
//! - Lets tests inject failures and canned replies per procedure
//!
//! This store is intended for:
//! - Unit and integration testing of queue and scheduler behaviour
//! - Reference semantics for the Lua procedures run by Redis

use crate::clock::Clock;
use crate::error::StoreError;
use crate::procedure::Procedure;
use crate::store::{ProcedureReply, ScriptStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Keyspace
// ============================================================================

/// Sorted set ordered by score, ties broken by member
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn add(&mut self, score: i64, member: &str) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Remove and return every member with score <= max, lowest first
    fn pop_up_to(&mut self, max: i64) -> Vec<String> {
        let due: Vec<(i64, String)> = self
            .ordered
            .iter()
            .take_while(|(score, _)| *score <= max)
            .cloned()
            .collect();

        for (score, member) in &due {
            self.ordered.remove(&(*score, member.clone()));
            self.scores.remove(member);
        }

        due.into_iter().map(|(_, member)| member).collect()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug)]
enum Entry {
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    SortedSet(SortedSet),
    Set(BTreeSet<String>),
    Text {
        value: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Procedure {
        procedure: "WRONGTYPE".to_string(),
        message: format!("key '{}' holds the wrong kind of value", key),
    }
}

/// All keys held by the store
struct Keyspace {
    entries: HashMap<String, Entry>,
}

macro_rules! entry_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        fn $name(&mut self, key: &str) -> Result<&mut $ty, StoreError> {
            match self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::$variant(Default::default()))
            {
                Entry::$variant(value) => Ok(value),
                _ => Err(wrong_type(key)),
            }
        }
    };
}

impl Keyspace {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    entry_accessor!(hash, Hash, HashMap<String, String>);
    entry_accessor!(list, List, VecDeque<String>);
    entry_accessor!(sorted_set, SortedSet, SortedSet);
    entry_accessor!(set, Set, BTreeSet<String>);

    /// Read a string value, treating an expired one as absent
    fn text(&mut self, key: &str, now: DateTime<Utc>) -> Result<Option<&str>, StoreError> {
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(Entry::Text { expires_at, .. }) => expires_at.is_some_and(|at| at <= now),
            Some(_) => return Err(wrong_type(key)),
        };

        if expired {
            self.entries.remove(key);
            return Ok(None);
        }

        match self.entries.get(key) {
            Some(Entry::Text { value, .. }) => Ok(Some(value.as_str())),
            _ => Ok(None),
        }
    }

    fn delete(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        match self.entries.remove(key) {
            Some(Entry::Text {
                expires_at: Some(at),
                ..
            }) => at > now,
            Some(_) => true,
            None => false,
        }
    }
}

// ============================================================================
// Native procedures
// ============================================================================

/// Arguments of one procedure invocation
struct Invocation<'a> {
    keys: &'a [String],
    args: &'a [String],
    now: DateTime<Utc>,
}

impl Invocation<'_> {
    fn key(&self, index: usize) -> Result<&str, StoreError> {
        self.keys
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| bad_arguments(format!("missing key #{}", index + 1)))
    }

    fn arg(&self, index: usize) -> Result<&str, StoreError> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| bad_arguments(format!("missing argument #{}", index + 1)))
    }

    fn int_arg(&self, index: usize) -> Result<i64, StoreError> {
        let raw = self.arg(index)?;
        raw.parse()
            .map_err(|_| bad_arguments(format!("argument #{} '{}' is not an integer", index + 1, raw)))
    }
}

fn bad_arguments(message: String) -> StoreError {
    StoreError::Procedure {
        procedure: "ERR".to_string(),
        message,
    }
}

fn decode(raw: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Procedure {
        procedure: "ERR".to_string(),
        message: format!("stored message is not valid JSON: {}", e),
    })
}

type NativeProcedure = fn(&mut Keyspace, &Invocation<'_>) -> Result<ProcedureReply, StoreError>;

fn native_procedure(name: &str) -> Option<NativeProcedure> {
    let procedure: NativeProcedure = match name {
        "put_messages" => put_messages,
        "checkout_messages" => checkout_messages,
        "remove_message" => remove_message,
        "release_message" => release_message,
        "queue_stats" => queue_stats,
        "promote_scheduled" => promote_scheduled,
        "reclaim_timed_out" => reclaim_timed_out,
        "acquire_lock" => acquire_lock,
        "release_lock" => release_lock,
        "release_lock_if_owner" => release_lock_if_owner,
        _ => return None,
    };
    Some(procedure)
}

/// Same contract as `scripts/put_messages.lua`.
/// Registers the queue, then files each id under exactly one partition.
fn put_messages(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let (registry, data, active, scheduled, processing) =
        (inv.key(0)?, inv.key(1)?, inv.key(2)?, inv.key(3)?, inv.key(4)?);
    let queue = inv.arg(0)?;
    let now = inv.int_arg(1)?;

    ks.set(registry)?.insert(queue.to_string());

    let batch = &inv.args[2..];
    if batch.len() % 3 != 0 {
        return Err(bad_arguments("messages must be id/activation/body triplets".to_string()));
    }

    for triplet in batch.chunks(3) {
        let (id, at, body) = (&triplet[0], triplet[1].parse::<i64>().ok(), &triplet[2]);

        ks.list(active)?.retain(|member| member != id);
        ks.sorted_set(scheduled)?.remove(id);
        ks.sorted_set(processing)?.remove(id);

        ks.hash(data)?.insert(id.clone(), body.clone());
        match at {
            Some(at) if at > now => ks.sorted_set(scheduled)?.add(at, id),
            _ => ks.list(active)?.push_back(id.clone()),
        }
    }

    Ok(ProcedureReply::Integer((batch.len() / 3) as i64))
}

/// Same contract as `scripts/checkout_messages.lua`.
/// Pops up to `count` ids off the active list and stamps `now + timeout` deadlines.
fn checkout_messages(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let (data, active, processing) = (inv.key(0)?, inv.key(1)?, inv.key(2)?);
    let now = inv.int_arg(0)?;
    let count = inv.int_arg(1)?.max(0) as usize;

    let mut out = Vec::new();
    while out.len() < count {
        let Some(id) = ks.list(active)?.pop_front() else {
            break;
        };
        let Some(raw) = ks.hash(data)?.get(&id).cloned() else {
            continue;
        };

        let mut message = decode(&raw)?;
        let deadline = message
            .get("timeout")
            .and_then(serde_json::Value::as_i64)
            .and_then(|timeout| now.checked_add(timeout))
            .ok_or_else(|| bad_arguments(format!("message {} has an unusable timeout", id)))?;
        if let Some(fields) = message.as_object_mut() {
            fields.insert("timeout_deadline".to_string(), deadline.into());
        }

        let encoded = message.to_string();
        ks.hash(data)?.insert(id.clone(), encoded.clone());
        ks.sorted_set(processing)?.add(deadline, &id);
        out.push(encoded);
    }

    Ok(ProcedureReply::Text(format!("[{}]", out.join(","))))
}

/// Same contract as `scripts/remove_message.lua`.
/// Moves the stored body to the archive hash from whichever partition holds the id.
fn remove_message(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let (data, active, scheduled, processing, archive) =
        (inv.key(0)?, inv.key(1)?, inv.key(2)?, inv.key(3)?, inv.key(4)?);
    let id = inv.arg(0)?;

    let Some(raw) = ks.hash(data)?.remove(id) else {
        return Ok(ProcedureReply::Integer(0));
    };

    ks.list(active)?.retain(|member| member != id);
    ks.sorted_set(scheduled)?.remove(id);
    ks.sorted_set(processing)?.remove(id);
    ks.hash(archive)?.insert(id.to_string(), raw);

    Ok(ProcedureReply::Integer(1))
}

/// Drop the deadline from a stored message and make it ready again
fn return_to_active(
    ks: &mut Keyspace,
    data: &str,
    active: &str,
    id: &str,
) -> Result<bool, StoreError> {
    let Some(raw) = ks.hash(data)?.get(id).cloned() else {
        return Ok(false);
    };

    let mut message = decode(&raw)?;
    if let Some(fields) = message.as_object_mut() {
        fields.remove("timeout_deadline");
    }
    ks.hash(data)?.insert(id.to_string(), message.to_string());
    ks.list(active)?.push_back(id.to_string());
    Ok(true)
}

/// Same contract as `scripts/release_message.lua`.
/// Only acts on ids currently in the processing set.
fn release_message(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let (data, active, processing) = (inv.key(0)?, inv.key(1)?, inv.key(2)?);
    let id = inv.arg(0)?;

    if !ks.sorted_set(processing)?.remove(id) {
        return Ok(ProcedureReply::Integer(0));
    }

    let released = return_to_active(ks, data, active, id)?;
    Ok(ProcedureReply::Integer(released as i64))
}

/// Same contract as `scripts/queue_stats.lua`.
/// Partition sizes as a JSON object.
fn queue_stats(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let (active, scheduled, processing, archive) =
        (inv.key(0)?, inv.key(1)?, inv.key(2)?, inv.key(3)?);

    let stats = serde_json::json!({
        "active": ks.list(active)?.len(),
        "scheduled": ks.sorted_set(scheduled)?.len(),
        "processing": ks.sorted_set(processing)?.len(),
        "archived": ks.hash(archive)?.len(),
    });

    Ok(ProcedureReply::Text(stats.to_string()))
}

fn registered_queues(ks: &mut Keyspace, registry: &str) -> Result<Vec<String>, StoreError> {
    Ok(ks.set(registry)?.iter().cloned().collect())
}

/// Same contract as `scripts/promote_scheduled.lua`.
/// Due members go to the tail of each registered queue's active list.
fn promote_scheduled(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let registry = inv.key(0)?;
    let now = inv.int_arg(0)?;
    let prefix = inv.arg(1)?;

    let mut remaining = 0;
    for queue in registered_queues(ks, registry)? {
        let base = format!("{}{}", prefix, queue);
        let scheduled = format!("{}:sch", base);
        let active = format!("{}:act", base);

        let due = ks.sorted_set(&scheduled)?.pop_up_to(now);
        ks.list(&active)?.extend(due);
        remaining += ks.sorted_set(&scheduled)?.len();
    }

    Ok(ProcedureReply::Integer(remaining as i64))
}

/// Same contract as `scripts/reclaim_timed_out.lua`.
/// Expired members lose their deadline and go to the tail of the active list.
fn reclaim_timed_out(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let registry = inv.key(0)?;
    let now = inv.int_arg(0)?;
    let prefix = inv.arg(1)?;

    let mut remaining = 0;
    for queue in registered_queues(ks, registry)? {
        let base = format!("{}{}", prefix, queue);
        let processing = format!("{}:proc", base);
        let data = format!("{}:data", base);
        let active = format!("{}:act", base);

        let expired = ks.sorted_set(&processing)?.pop_up_to(now);
        for id in expired {
            return_to_active(ks, &data, &active, &id)?;
        }
        remaining += ks.sorted_set(&processing)?.len();
    }

    Ok(ProcedureReply::Integer(remaining as i64))
}

/// Same contract as `scripts/acquire_lock.lua`.
/// `SET key owner NX PX lease`.
fn acquire_lock(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let key = inv.key(0)?;
    let lease_ms = inv.int_arg(0)?;
    let owner = inv.arg(1)?;
    let expires_at = Duration::try_milliseconds(lease_ms)
        .filter(|lease| *lease > Duration::zero())
        .and_then(|lease| inv.now.checked_add_signed(lease))
        .ok_or_else(|| bad_arguments(format!("invalid expire time {}", lease_ms)))?;

    if ks.text(key, inv.now)?.is_some() {
        return Ok(ProcedureReply::Integer(0));
    }

    ks.entries.insert(
        key.to_string(),
        Entry::Text {
            value: owner.to_string(),
            expires_at: Some(expires_at),
        },
    );
    Ok(ProcedureReply::Integer(1))
}

/// Same contract as `scripts/release_lock.lua`.
/// `DEL key` regardless of owner.
fn release_lock(ks: &mut Keyspace, inv: &Invocation<'_>) -> Result<ProcedureReply, StoreError> {
    let key = inv.key(0)?;
    Ok(ProcedureReply::Integer(ks.delete(key, inv.now) as i64))
}

/// Same contract as `scripts/release_lock_if_owner.lua`.
/// `DEL key` only when it still holds `owner`.
fn release_lock_if_owner(
    ks: &mut Keyspace,
    inv: &Invocation<'_>,
) -> Result<ProcedureReply, StoreError> {
    let key = inv.key(0)?;
    let owner = inv.arg(0)?;

    if ks.text(key, inv.now)? != Some(owner) {
        return Ok(ProcedureReply::Integer(0));
    }
    Ok(ProcedureReply::Integer(ks.delete(key, inv.now) as i64))
}

// ============================================================================
// InMemoryStore
// ============================================================================

/// Thread-safe state behind the store
struct StoreState {
    keyspace: Keyspace,
    /// Procedure hashes the store has seen a body for
    scripts: HashMap<String, &'static str>,
    /// One-shot failures keyed by procedure name
    failures: HashMap<&'static str, VecDeque<String>>,
    /// One-shot replies keyed by procedure name
    replies: HashMap<&'static str, VecDeque<ProcedureReply>>,
}

/// In-memory store implementation
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
    full_submissions: Arc<AtomicUsize>,
}

impl InMemoryStore {
    /// Create new in-memory store reading time from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                keyspace: Keyspace::new(),
                scripts: HashMap::new(),
                failures: HashMap::new(),
                replies: HashMap::new(),
            })),
            clock,
            full_submissions: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget every cached procedure, as `SCRIPT FLUSH` would
    pub fn flush_script_cache(&self) {
        self.lock_state().scripts.clear();
    }

    /// Number of times a full procedure body was submitted
    pub fn full_submissions(&self) -> usize {
        self.full_submissions.load(Ordering::SeqCst)
    }

    /// Make the next invocation of `procedure` fail with a connection error
    pub fn inject_failure(&self, procedure: &'static str, message: impl Into<String>) {
        self.lock_state()
            .failures
            .entry(procedure)
            .or_default()
            .push_back(message.into());
    }

    /// Make the next invocation of `procedure` return `reply` without touching any key
    pub fn inject_reply(&self, procedure: &'static str, reply: ProcedureReply) {
        self.lock_state()
            .replies
            .entry(procedure)
            .or_default()
            .push_back(reply);
    }

    /// Current owner of a lock key, if the lease is live
    pub fn lock_owner(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let owner = state.keyspace.text(key, now).ok().flatten().map(str::to_string);
        owner
    }

    fn execute(
        &self,
        state: &mut StoreState,
        name: &'static str,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        if let Some(message) = state.failures.get_mut(name).and_then(VecDeque::pop_front) {
            return Err(StoreError::Connection { message });
        }
        if let Some(reply) = state.replies.get_mut(name).and_then(VecDeque::pop_front) {
            return Ok(reply);
        }

        let procedure = native_procedure(name).ok_or_else(|| StoreError::Procedure {
            procedure: name.to_string(),
            message: "no native implementation".to_string(),
        })?;

        let invocation = Invocation {
            keys,
            args,
            now: self.clock.now(),
        };
        procedure(&mut state.keyspace, &invocation)
    }
}

#[async_trait]
impl ScriptStore for InMemoryStore {
    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        let mut state = self.lock_state();
        let name = *state.scripts.get(sha).ok_or_else(|| StoreError::NoScript {
            sha: sha.to_string(),
        })?;
        self.execute(&mut state, name, keys, args)
    }

    async fn eval(
        &self,
        procedure: &Procedure,
        keys: &[String],
        args: &[String],
    ) -> Result<ProcedureReply, StoreError> {
        self.full_submissions.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock_state();
        state
            .scripts
            .insert(procedure.sha().to_string(), procedure.name());
        self.execute(&mut state, procedure.name(), keys, args)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
