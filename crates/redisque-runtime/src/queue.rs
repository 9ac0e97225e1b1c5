//! Message queue: enqueue, checkout, acknowledge and release.
//!
//! Each operation is exactly one procedure call, so a message moves between
//! the scheduled, active and processing partitions indivisibly no matter how
//! many processes share the store.

use crate::clock::Clock;
use crate::config::QueueDefaults;
use crate::error::{QueueError, ValidationError};
use crate::message::{EnqueueOptions, Message, MessageId, NewMessage, QueueName};
use crate::procedure::{ProcedureRunner, Procedures};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Prefix shared by every per-queue key
pub const QUEUE_KEY_PREFIX: &str = "q:";

/// Set of queue names the scheduler scans
pub const QUEUE_REGISTRY_KEY: &str = "redisque:queues";

const EVENT_CAPACITY: usize = 256;

/// Store keys of one queue's partitions
#[derive(Debug, Clone)]
struct QueueKeys {
    data: String,
    active: String,
    scheduled: String,
    processing: String,
    archive: String,
}

impl QueueKeys {
    fn new(name: &QueueName) -> Self {
        let base = format!("{}{}", QUEUE_KEY_PREFIX, name);
        Self {
            data: format!("{}:data", base),
            active: format!("{}:act", base),
            scheduled: format!("{}:sch", base),
            processing: format!("{}:proc", base),
            archive: format!("{}:del", base),
        }
    }
}

/// Outcome of a detached acknowledge or release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Deleted(MessageId),
    Released(MessageId),
    Error {
        operation: &'static str,
        message_id: MessageId,
        message: String,
    },
}

/// Number of messages in each partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub scheduled: u64,
    pub active: u64,
    pub processing: u64,
    pub archived: u64,
}

/// A named queue over a shared store
#[derive(Clone)]
pub struct MessageQueue {
    name: QueueName,
    keys: Arc<QueueKeys>,
    runner: ProcedureRunner,
    clock: Arc<dyn Clock>,
    defaults: QueueDefaults,
    events: broadcast::Sender<QueueEvent>,
}

impl MessageQueue {
    pub fn new(
        name: QueueName,
        runner: ProcedureRunner,
        clock: Arc<dyn Clock>,
        defaults: QueueDefaults,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            keys: Arc::new(QueueKeys::new(&name)),
            name,
            runner,
            clock,
            defaults,
            events,
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Receive the outcomes of detached operations
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Put one or more messages into the queue in a single atomic call.
    ///
    /// Every message is validated first; one invalid message rejects the
    /// whole batch before the store is contacted.
    #[instrument(skip(self, messages, options), fields(queue = %self.name))]
    pub async fn enqueue<I, M>(
        &self,
        messages: I,
        options: &EnqueueOptions,
    ) -> Result<Vec<MessageId>, QueueError>
    where
        I: IntoIterator<Item = M>,
        M: Into<NewMessage>,
    {
        let now = self.clock.now();
        let resolved = messages
            .into_iter()
            .map(|message| {
                let message: NewMessage = message.into();
                message.resolve(options, self.defaults.timeout_seconds, now)
            })
            .collect::<Result<Vec<Message>, ValidationError>>()?;

        if resolved.is_empty() {
            return Ok(Vec::new());
        }

        let now = (now.timestamp_millis() as f64 / 1000.0).round() as i64;
        let mut args = Vec::with_capacity(2 + resolved.len() * 3);
        args.push(self.name.to_string());
        args.push(now.to_string());
        for message in &resolved {
            let body = serde_json::to_string(message).map_err(|e| ValidationError::InvalidFormat {
                field: "message".to_string(),
                message: e.to_string(),
            })?;
            args.push(message.id.to_string());
            args.push(
                message
                    .activation_time
                    .map(|at| at.to_string())
                    .unwrap_or_default(),
            );
            args.push(body);
        }

        let keys = [
            QUEUE_REGISTRY_KEY.to_string(),
            self.keys.data.clone(),
            self.keys.active.clone(),
            self.keys.scheduled.clone(),
            self.keys.processing.clone(),
        ];
        self.runner
            .run_integer(&Procedures::get().put_messages, &keys, &args)
            .await?;

        let delayed = resolved.iter().filter(|m| m.is_delayed(now)).count();
        debug!(count = resolved.len(), delayed, "Enqueued messages");

        Ok(resolved.into_iter().map(|message| message.id).collect())
    }

    /// Put a single message into the queue with no call options
    pub async fn enqueue_one(&self, message: impl Into<NewMessage>) -> Result<MessageId, QueueError> {
        let mut ids = self
            .enqueue(std::iter::once(message), &EnqueueOptions::default())
            .await?;
        ids.pop().ok_or_else(|| {
            QueueError::Validation(ValidationError::Required {
                field: "message".to_string(),
            })
        })
    }

    /// Re-enqueue messages that already carry an id.
    ///
    /// The id is not checked against the store; an id currently held in any
    /// partition is moved to wherever the new copy belongs.
    pub async fn reschedule<I>(
        &self,
        messages: I,
        options: &EnqueueOptions,
    ) -> Result<Vec<MessageId>, QueueError>
    where
        I: IntoIterator<Item = NewMessage>,
    {
        let messages: Vec<NewMessage> = messages.into_iter().collect();
        if messages.iter().any(|message| message.id.is_none()) {
            return Err(ValidationError::Required {
                field: "id".to_string(),
            }
            .into());
        }

        self.enqueue(messages, options).await
    }

    /// Claim up to `count` ready messages (the queue default when `None`).
    ///
    /// Returns an empty list when nothing is ready; never waits.
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn checkout(&self, count: Option<u32>) -> Result<Vec<Message>, QueueError> {
        let count = count.unwrap_or(self.defaults.messages_per_call);
        if count == 0 {
            return Ok(Vec::new());
        }

        let keys = [
            self.keys.data.clone(),
            self.keys.active.clone(),
            self.keys.processing.clone(),
        ];
        let args = [self.clock.epoch_seconds().to_string(), count.to_string()];

        let messages: Vec<Message> = self
            .runner
            .run_json(&Procedures::get().checkout_messages, &keys, &args)
            .await?;

        debug!(requested = count, claimed = messages.len(), "Checked out messages");
        Ok(messages)
    }

    /// Archive a message from whichever partition holds it.
    ///
    /// Unknown ids are a no-op.
    #[instrument(skip(self), fields(queue = %self.name, message_id = %id))]
    pub async fn acknowledge(&self, id: &MessageId) -> Result<(), QueueError> {
        let keys = [
            self.keys.data.clone(),
            self.keys.active.clone(),
            self.keys.scheduled.clone(),
            self.keys.processing.clone(),
            self.keys.archive.clone(),
        ];
        let args = [id.to_string()];

        let removed = self
            .runner
            .run_integer(&Procedures::get().remove_message, &keys, &args)
            .await?;

        if removed == 0 {
            debug!("Acknowledged unknown message");
        }
        Ok(())
    }

    /// Return an in-flight message to the active partition immediately
    #[instrument(skip(self), fields(queue = %self.name, message_id = %id))]
    pub async fn release(&self, id: &MessageId) -> Result<(), QueueError> {
        let keys = [
            self.keys.data.clone(),
            self.keys.active.clone(),
            self.keys.processing.clone(),
        ];
        let args = [id.to_string()];

        let released = self
            .runner
            .run_integer(&Procedures::get().release_message, &keys, &args)
            .await?;

        if released == 0 {
            debug!("Released message that was not in flight");
        }
        Ok(())
    }

    /// Acknowledge without waiting; the outcome is published as a [`QueueEvent`]
    pub fn acknowledge_detached(&self, id: MessageId) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let outcome = queue.acknowledge(&id).await;
            queue.publish("acknowledge", id, outcome, QueueEvent::Deleted);
        })
    }

    /// Release without waiting; the outcome is published as a [`QueueEvent`]
    pub fn release_detached(&self, id: MessageId) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let outcome = queue.release(&id).await;
            queue.publish("release", id, outcome, QueueEvent::Released);
        })
    }

    fn publish(
        &self,
        operation: &'static str,
        id: MessageId,
        outcome: Result<(), QueueError>,
        on_success: fn(MessageId) -> QueueEvent,
    ) {
        let event = match outcome {
            Ok(()) => on_success(id),
            Err(e) => {
                error!(
                    queue = %self.name,
                    message_id = %id,
                    operation,
                    error = %e,
                    "Detached queue operation failed"
                );
                QueueEvent::Error {
                    operation,
                    message_id: id,
                    message: e.to_string(),
                }
            }
        };

        // Nobody listening is fine; failures were already logged.
        let _ = self.events.send(event);
    }

    /// Count the messages in every partition
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let keys = [
            self.keys.active.clone(),
            self.keys.scheduled.clone(),
            self.keys.processing.clone(),
            self.keys.archive.clone(),
        ];

        let stats: QueueStats = self
            .runner
            .run_json(&Procedures::get().queue_stats, &keys, &[])
            .await?;

        debug!(
            queue = %self.name,
            scheduled = stats.scheduled,
            active = stats.active,
            processing = stats.processing,
            archived = stats.archived,
            "Queue statistics"
        );
        Ok(stats)
    }
}
