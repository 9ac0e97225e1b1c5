//! Integration tests for concurrent consumers
//!
//! These tests verify:
//! - Competing consumers never receive the same message twice
//! - Every ready message is delivered to some consumer
//! - Acknowledge and release race safely on the same message

mod common;

use common::Fleet;
use redisque_runtime::{EnqueueOptions, MessageId};
use std::collections::HashSet;

/// Verify that consumers in separate processes split the ready list without overlap
#[tokio::test]
async fn test_concurrent_consumers_receive_disjoint_messages() -> anyhow::Result<()> {
    // Arrange
    let fleet = Fleet::new();
    let producer = fleet.process().queue("fanout")?;
    let bodies: Vec<String> = (0..60).map(|i| format!("job-{}", i)).collect();
    let enqueued = producer.enqueue(bodies, &EnqueueOptions::default()).await?;

    // Act
    let mut handles = Vec::new();
    for _ in 0..6 {
        let consumer = fleet.process().queue("fanout")?;
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let batch = consumer.checkout(Some(4)).await?;
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|m| m.id));
                tokio::task::yield_now().await;
            }
            Ok::<_, redisque_runtime::QueueError>(claimed)
        }));
    }

    let mut seen: HashSet<MessageId> = HashSet::new();
    for handle in handles {
        for id in handle.await?? {
            assert!(seen.insert(id.clone()), "{} delivered twice", id);
        }
    }

    // Assert
    let expected: HashSet<MessageId> = enqueued.into_iter().collect();
    assert_eq!(seen, expected);
    let stats = producer.stats().await?;
    assert_eq!((stats.active, stats.processing), (0, 60));
    Ok(())
}

/// Verify that racing acknowledgements archive a message exactly once
#[tokio::test]
async fn test_racing_acknowledgements_archive_once() -> anyhow::Result<()> {
    let fleet = Fleet::new();
    let queue = fleet.process().queue("acks")?;
    let id = queue.enqueue_one("once").await?;
    queue.checkout(None).await?;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let queue = fleet.process().queue("acks")?;
        let id = id.clone();
        handles.push(tokio::spawn(async move { queue.acknowledge(&id).await }));
    }
    for handle in handles {
        handle.await??;
    }

    let stats = queue.stats().await?;
    assert_eq!(stats.archived, 1);
    assert_eq!(stats.processing, 0);
    Ok(())
}

/// Verify that a release racing an acknowledgement leaves the message in one place
#[tokio::test]
async fn test_release_and_acknowledge_race_leaves_single_copy() -> anyhow::Result<()> {
    let fleet = Fleet::new();
    let queue = fleet.process().queue("race")?;
    let id = queue.enqueue_one("contested").await?;
    queue.checkout(None).await?;

    let releaser = fleet.process().queue("race")?;
    let acker = fleet.process().queue("race")?;
    let release_id = id.clone();
    let ack_id = id.clone();
    let (released, acked) = tokio::join!(
        tokio::spawn(async move { releaser.release(&release_id).await }),
        tokio::spawn(async move { acker.acknowledge(&ack_id).await }),
    );
    released??;
    acked??;

    // Either order is valid; the message is never both ready and in flight.
    let stats = queue.stats().await?;
    assert_eq!(stats.processing, 0);
    assert!(stats.active <= 1);
    assert_eq!(stats.active + stats.archived, 1);
    Ok(())
}

/// Verify that every consumer sees the configured batch size by default
#[tokio::test]
async fn test_default_batch_size_comes_from_configuration() -> anyhow::Result<()> {
    let fleet = Fleet::new();
    let mut config = redisque_runtime::RedisqueConfig::default();
    config.queue.messages_per_call = 3;
    let queue = fleet.process_with(config).queue("batched")?;
    queue
        .enqueue(["1", "2", "3", "4", "5"], &EnqueueOptions::default())
        .await?;

    assert_eq!(queue.checkout(None).await?.len(), 3);
    assert_eq!(queue.checkout(None).await?.len(), 2);
    Ok(())
}
