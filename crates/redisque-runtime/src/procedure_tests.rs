//! Tests for procedure hashing and the NOSCRIPT fallback.

use super::*;
use crate::clock::SystemClock;
use crate::providers::InMemoryStore;

fn runner() -> (ProcedureRunner, InMemoryStore) {
    let store = InMemoryStore::new(Arc::new(SystemClock));
    (ProcedureRunner::new(Arc::new(store.clone())), store)
}

fn lock_key() -> Vec<String> {
    vec!["locks:test".to_string()]
}

#[test]
fn test_sha_is_hex_sha1_of_body() {
    let procedure = Procedure::new("noop", "return 1");

    assert_eq!(procedure.sha(), "e0e1f9fabfc9d4800c877a703b823ac0578ff8db");
    assert_eq!(procedure.sha().len(), 40);
}

#[test]
fn test_every_procedure_has_a_distinct_hash() {
    let all = Procedures::get();
    let hashes: std::collections::HashSet<&str> = [
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
    .iter()
    .map(|p| p.sha())
    .collect();

    assert_eq!(hashes.len(), 10);
}

#[tokio::test]
async fn test_uncached_procedure_is_submitted_once_then_run_by_hash() {
    // Arrange
    let (runner, store) = runner();
    let procedure = &Procedures::get().release_lock;

    // Act
    runner.run(procedure, &lock_key(), &[]).await.unwrap();
    runner.run(procedure, &lock_key(), &[]).await.unwrap();

    // Assert
    assert_eq!(store.full_submissions(), 1);
}

#[tokio::test]
async fn test_flushed_cache_is_repopulated_transparently() {
    let (runner, store) = runner();
    let procedure = &Procedures::get().release_lock;
    runner.run(procedure, &lock_key(), &[]).await.unwrap();

    store.flush_script_cache();
    let result = runner.run(procedure, &lock_key(), &[]).await;

    assert!(result.is_ok());
    assert_eq!(store.full_submissions(), 2);
}

#[tokio::test]
async fn test_other_store_errors_are_not_retried() {
    // Arrange
    let (runner, store) = runner();
    let procedure = &Procedures::get().release_lock;
    runner.run(procedure, &lock_key(), &[]).await.unwrap();
    store.inject_failure("release_lock", "broken pipe");

    // Act
    let result = runner.run(procedure, &lock_key(), &[]).await;

    // Assert
    assert!(matches!(result, Err(StoreError::Connection { .. })));
    assert_eq!(store.full_submissions(), 1, "no resubmission on non-NOSCRIPT errors");
}

#[tokio::test]
async fn test_run_integer_rejects_non_integer_reply() {
    let (runner, store) = runner();
    store.inject_reply("release_lock", ProcedureReply::Text("yes".to_string()));

    let result = runner
        .run_integer(&Procedures::get().release_lock, &lock_key(), &[])
        .await;

    assert!(matches!(
        result,
        Err(QueueError::Deserialization(DeserializationError::UnexpectedShape {
            expected: "integer",
            ..
        }))
    ));
}

#[tokio::test]
async fn test_run_json_reports_malformed_document() {
    let (runner, store) = runner();
    store.inject_reply("queue_stats", ProcedureReply::Text("{not json".to_string()));

    let result: Result<serde_json::Value, _> = runner
        .run_json(&Procedures::get().queue_stats, &[], &[])
        .await;

    match result {
        Err(QueueError::Deserialization(e @ DeserializationError::Malformed { .. })) => {
            assert_eq!(e.procedure(), "queue_stats")
        }
        other => panic!("Expected deserialization error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_run_json_requires_text_reply() {
    let (runner, store) = runner();
    store.inject_reply("queue_stats", ProcedureReply::Nil);

    let result: Result<serde_json::Value, _> = runner
        .run_json(&Procedures::get().queue_stats, &[], &[])
        .await;

    assert!(matches!(
        result,
        Err(QueueError::Deserialization(DeserializationError::UnexpectedShape {
            expected: "JSON text",
            ..
        }))
    ));
}

#[tokio::test]
async fn test_garbage_reply_to_queue_operation_is_deserialization_error() {
    let (runner, store) = runner();
    let queue = crate::queue::MessageQueue::new(
        "garbled".parse().unwrap(),
        runner,
        Arc::new(SystemClock),
        crate::config::QueueDefaults::default(),
    );
    store.inject_reply("remove_message", ProcedureReply::Text("garbage".to_string()));

    let result = queue.acknowledge(&"m1".parse().unwrap()).await;

    match result {
        Err(QueueError::Deserialization(e)) => assert_eq!(e.procedure(), "remove_message"),
        other => panic!("Expected deserialization error, got: {:?}", other),
    }
}
