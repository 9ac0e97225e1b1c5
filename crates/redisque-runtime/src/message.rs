//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Longest visibility timeout a message may carry, in seconds (one year)
pub const MAX_TIMEOUT_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        // Validate length
        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric, hyphens, underscores)
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Delay
// ============================================================================

/// When a message becomes eligible for checkout
#[derive(Debug, Clone, PartialEq)]
pub enum Delay {
    /// Absolute activation time
    At(DateTime<Utc>),
    /// Offset in seconds from the moment of enqueue
    After(f64),
}

impl Delay {
    pub fn seconds(seconds: u64) -> Self {
        Self::After(seconds as f64)
    }

    /// Resolve into an absolute activation time in epoch seconds
    pub fn activation_time(&self, now: DateTime<Utc>) -> Result<i64, ValidationError> {
        let at = match self {
            Self::At(at) => *at,
            Self::After(seconds) => {
                if !seconds.is_finite() {
                    return Err(ValidationError::InvalidFormat {
                        field: "delay".to_string(),
                        message: "must be a finite number of seconds".to_string(),
                    });
                }
                if *seconds < 0.0 {
                    return Err(ValidationError::OutOfRange {
                        field: "delay".to_string(),
                        message: "must not be negative".to_string(),
                    });
                }
                let millis = (seconds * 1000.0).round();
                let too_far = || ValidationError::OutOfRange {
                    field: "delay".to_string(),
                    message: "is too far in the future".to_string(),
                };
                if millis >= i64::MAX as f64 {
                    return Err(too_far());
                }
                Duration::try_milliseconds(millis as i64)
                    .and_then(|offset| now.checked_add_signed(offset))
                    .ok_or_else(too_far)?
            }
        };

        Ok((at.timestamp_millis() as f64 / 1000.0).round() as i64)
    }
}

impl From<DateTime<Utc>> for Delay {
    fn from(at: DateTime<Utc>) -> Self {
        Self::At(at)
    }
}

impl From<std::time::Duration> for Delay {
    fn from(after: std::time::Duration) -> Self {
        Self::After(after.as_secs_f64())
    }
}

impl FromStr for Delay {
    type Err = ValidationError;

    /// Numbers are relative seconds, anything else must be an RFC 3339 timestamp
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(seconds) = trimmed.parse::<f64>() {
            if !seconds.is_finite() {
                return Err(ValidationError::InvalidFormat {
                    field: "delay".to_string(),
                    message: format!("'{}' is not a finite number", s),
                });
            }
            return Ok(Self::After(seconds));
        }

        DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| Self::At(dt.with_timezone(&Utc)))
            .map_err(|e| ValidationError::InvalidFormat {
                field: "delay".to_string(),
                message: format!("'{}' is neither seconds nor a timestamp: {}", s, e),
            })
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be enqueued
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub id: Option<MessageId>,
    pub body: String,
    pub timeout: Option<u64>,
    pub delay: Option<Delay>,
    pub attributes: HashMap<String, String>,
}

impl NewMessage {
    /// Create new message with body
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Use a caller-supplied id instead of a generated one
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Override the visibility timeout, in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_delay(mut self, delay: impl Into<Delay>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Merge this message over the call options and queue defaults.
    ///
    /// Message fields win over call options, which win over queue defaults.
    pub(crate) fn resolve(
        self,
        options: &EnqueueOptions,
        default_timeout: u64,
        now: DateTime<Utc>,
    ) -> Result<Message, ValidationError> {
        if self.body.is_empty() {
            return Err(ValidationError::Required {
                field: "body".to_string(),
            });
        }

        let timeout = self.timeout.or(options.timeout).unwrap_or(default_timeout);
        if timeout == 0 || timeout > MAX_TIMEOUT_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "timeout".to_string(),
                message: format!("must be between 1 and {} seconds", MAX_TIMEOUT_SECONDS),
            });
        }

        let activation_time = match self.delay.as_ref().or(options.delay.as_ref()) {
            Some(delay) => Some(delay.activation_time(now)?),
            None => None,
        };

        let mut attributes = options.attributes.clone();
        attributes.extend(self.attributes);

        Ok(Message {
            id: self.id.unwrap_or_default(),
            body: self.body,
            timeout,
            attributes,
            activation_time,
            timeout_deadline: None,
        })
    }
}

impl From<&str> for NewMessage {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

impl From<String> for NewMessage {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

impl From<Message> for NewMessage {
    fn from(message: Message) -> Self {
        Self {
            id: Some(message.id),
            body: message.body,
            timeout: Some(message.timeout),
            delay: None,
            attributes: message.attributes,
        }
    }
}

/// A message as stored in, and returned by, the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub body: String,
    /// Visibility timeout in seconds applied at checkout
    pub timeout: u64,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Epoch seconds at which a delayed message becomes ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_time: Option<i64>,
    /// Epoch seconds after which a checked-out message is reclaimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_deadline: Option<i64>,
}

impl Message {
    /// Check whether the message is still waiting in the scheduled partition
    pub fn is_delayed(&self, now: i64) -> bool {
        self.activation_time.is_some_and(|at| at > now)
    }
}

/// Per-call options applied to every message of an enqueue batch
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub timeout: Option<u64>,
    pub delay: Option<Delay>,
    pub attributes: HashMap<String, String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_delay(mut self, delay: impl Into<Delay>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
