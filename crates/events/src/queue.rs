//! Work-queue transport abstraction (mechanics only).
//!
//! A queue here has the usual hosted-queue semantics:
//!
//! - **At-least-once delivery**: a received message stays owned by the queue
//!   until it is explicitly deleted with its receipt handle.
//! - **Visibility timeout**: a received but undeleted message becomes visible
//!   again after a while and is redelivered with a higher `receive_count`.
//! - **Best-effort ordering**: no FIFO guarantee across batches.
//!
//! Consumers must therefore tolerate duplicates. Nothing in this trait retries
//! on its own; retries happen through redelivery or the caller's next call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Queue-assigned identifier of an enqueued message.
pub type MessageId = String;

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: MessageId,
    /// JSON event body as published.
    pub body: String,
    /// Handle that must be passed to [`QueueClient::delete`] for this delivery.
    pub receipt_handle: String,
    /// Delivery attempt, starting at 1 on first delivery.
    pub receive_count: u32,
}

/// Parameters of a single receive call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Upper bound on the batch size.
    pub max_messages: usize,
    /// How long to long-poll when the queue is empty.
    pub wait_time: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("queue message could not be decoded: {0}")]
    Deserialization(String),

    #[error("receipt handle {receipt_handle} is not valid for queue {queue}")]
    ReceiptNotFound {
        queue: String,
        receipt_handle: String,
    },
}

/// Transport used by both the event publisher and the queue pollers.
///
/// One instance is built at startup and shared (`Arc<dyn QueueClient>`).
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue one message body. Exactly one attempt.
    async fn send(&self, queue: &str, body: String) -> Result<MessageId, QueueError>;

    /// Receive up to `options.max_messages`, waiting up to `options.wait_time`
    /// when nothing is available. An empty batch is not an error.
    async fn receive(
        &self,
        queue: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a delivered message for good.
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> QueueClient for Arc<Q>
where
    Q: QueueClient + ?Sized,
{
    async fn send(&self, queue: &str, body: String) -> Result<MessageId, QueueError> {
        (**self).send(queue, body).await
    }

    async fn receive(
        &self,
        queue: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        (**self).receive(queue, options).await
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        (**self).delete(queue, receipt_handle).await
    }
}
