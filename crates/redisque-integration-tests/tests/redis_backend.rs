//! Integration tests against a live Redis server
//!
//! These tests are ignored by default. Run them with a server on
//! localhost:6379 (logical database 1 is used and left with test keys):
//!
//! ```text
//! cargo test -p redisque-integration-tests --test redis_backend -- --ignored
//! ```

use redisque_runtime::{
    Delay, EnqueueOptions, MessageId, NewMessage, Redisque, RedisqueConfig, SchedulerEvent,
};
use std::time::Duration;

async fn connect() -> anyhow::Result<Redisque> {
    Ok(Redisque::connect(RedisqueConfig::default()).await?)
}

fn unique_queue() -> String {
    format!("it-{}", MessageId::new())
}

/// Verify the full lifecycle through real Lua procedures
#[tokio::test]
#[ignore = "requires a Redis server on localhost:6379"]
async fn test_lifecycle_against_redis() -> anyhow::Result<()> {
    let redisque = connect().await?;
    let queue = redisque.queue(&unique_queue())?;

    let id = queue
        .enqueue_one(NewMessage::new("payload").with_attribute("k", "v"))
        .await?;
    let claimed = queue.checkout(Some(10)).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].attributes["k"], "v");

    queue.release(&id).await?;
    assert_eq!(queue.stats().await?.active, 1);

    queue.checkout(None).await?;
    queue.acknowledge(&id).await?;
    let stats = queue.stats().await?;
    assert_eq!((stats.active, stats.processing, stats.archived), (0, 0, 1));
    Ok(())
}

/// Verify that scripts survive a server-side cache flush
#[tokio::test]
#[ignore = "requires a Redis server on localhost:6379"]
async fn test_procedures_recover_after_script_flush() -> anyhow::Result<()> {
    let redisque = connect().await?;
    let queue = redisque.queue(&unique_queue())?;
    queue.enqueue_one("before").await?;

    let client = redis::Client::open(redisque.config().store.url())?;
    let mut connection = client.get_multiplexed_async_connection().await?;
    redis::cmd("SCRIPT")
        .arg("FLUSH")
        .query_async::<_, ()>(&mut connection)
        .await?;

    queue.enqueue_one("after").await?;
    assert_eq!(queue.stats().await?.active, 2);
    Ok(())
}

/// Verify that a running scheduler promotes a delayed message
#[tokio::test]
#[ignore = "requires a Redis server on localhost:6379"]
async fn test_scheduler_promotes_against_redis() -> anyhow::Result<()> {
    let redisque = connect().await?;
    let queue = redisque.queue(&unique_queue())?;
    queue
        .enqueue(["later"], &EnqueueOptions::new().with_delay(Delay::seconds(2)))
        .await?;
    assert!(queue.checkout(None).await?.is_empty());

    let scheduler = redisque.scheduler();
    let mut events = scheduler.subscribe();
    scheduler.start();

    let promoted = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            if let Ok(SchedulerEvent::Expire(_)) = events.recv().await {
                if !queue.checkout(None).await?.is_empty() {
                    return Ok::<_, anyhow::Error>(true);
                }
            }
        }
    })
    .await;

    scheduler.stop().await;
    assert!(matches!(promoted, Ok(Ok(true))));
    Ok(())
}

/// Verify exclusive leases through the real lock procedures
#[tokio::test]
#[ignore = "requires a Redis server on localhost:6379"]
async fn test_lock_exclusivity_against_redis() -> anyhow::Result<()> {
    let first = connect().await?.locks();
    let second = connect().await?.locks();
    let name = unique_queue();

    assert!(first.acquire(&name, Duration::from_secs(5)).await?);
    assert!(!second.acquire(&name, Duration::from_secs(5)).await?);
    assert!(!second.release_if_owner(&name).await?);
    assert!(first.release_if_owner(&name).await?);
    assert!(second.acquire(&name, Duration::from_secs(5)).await?);
    second.release(&name).await?;
    Ok(())
}
