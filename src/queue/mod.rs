pub mod amqp;
pub mod memory;
pub mod monitor;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub payload: Vec<u8>,
    pub content_type: String,
}

impl QueueMessage {
    pub fn json(payload: Vec<u8>) -> Self {
        Self {
            payload,
            content_type: JSON_CONTENT_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("publish to '{queue}' failed: {reason}")]
    Publish { queue: String, reason: String },
    #[error("publish to '{queue}' timed out after {timeout:?}")]
    Timeout { queue: String, timeout: Duration },
    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),
    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;
    async fn nack(&self, requeue: bool) -> Result<(), QueueError>;
}

/// A message pulled from a queue. It stays owned by the broker until it is
/// acked, or nacked without requeue.
pub struct Delivery {
    pub message: QueueMessage,
    pub redelivered: bool,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(message: QueueMessage, redelivered: bool, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            message,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.acker.nack(requeue).await
    }
}

#[async_trait]
pub trait DeliveryStream: Send {
    /// Wait for the next delivery. `None` means the subscription ended.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, QueueError>>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError>;

    /// Number of ready messages waiting in `queue`.
    async fn depth(&self, queue: &str) -> Result<u32, QueueError>;

    /// Start pulling from `queue`, one unacknowledged delivery at a time.
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, QueueError>;
}

/// Publish with an upper bound on how long the broker may block.
pub async fn publish_with_timeout(
    broker: &dyn Broker,
    queue: &str,
    message: &QueueMessage,
    timeout: Duration,
) -> Result<(), QueueError> {
    match tokio::time::timeout(timeout, broker.publish(queue, message)).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::Timeout {
            queue: queue.to_string(),
            timeout,
        }),
    }
}
