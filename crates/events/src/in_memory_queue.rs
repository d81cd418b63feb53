//! In-memory work queue for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::queue::{MessageId, QueueClient, QueueError, QueueMessage, ReceiveOptions};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    receive_count: u32,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|t| t <= now)
    }
}

/// In-memory queue with receive/delete/visibility-timeout semantics.
///
/// - No persistence
/// - Queues are created on first use
/// - Undeleted messages reappear after the visibility timeout, with a fresh
///   receipt handle and an incremented `receive_count`
#[derive(Debug)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero timeout makes undeleted messages visible again immediately.
    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Number of messages held by `queue`, in flight or not.
    pub fn len(&self, queue: &str) -> usize {
        self.lock().get(queue).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Bodies held by `queue`, oldest first.
    pub fn bodies(&self, queue: &str) -> Vec<String> {
        self.lock()
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<StoredMessage>>> {
        // A poisoned lock only means a test panicked mid-operation; the data is still usable.
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take up to `max` visible messages, or report when the next in-flight one expires.
    fn take_visible(&self, queue: &str, max: usize) -> (Vec<QueueMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut queues = self.lock();
        let Some(messages) = queues.get_mut(queue) else {
            return (Vec::new(), None);
        };

        let mut batch = Vec::new();
        let mut next_expiry: Option<Instant> = None;

        for stored in messages.iter_mut() {
            if batch.len() >= max {
                break;
            }
            if !stored.is_visible(now) {
                if let Some(t) = stored.invisible_until {
                    next_expiry = Some(next_expiry.map_or(t, |n| n.min(t)));
                }
                continue;
            }

            let receipt = Uuid::now_v7().to_string();
            stored.receive_count += 1;
            stored.receipt_handle = Some(receipt.clone());
            stored.invisible_until = Some(now + self.visibility_timeout);

            batch.push(QueueMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                receipt_handle: receipt,
                receive_count: stored.receive_count,
            });
        }

        (batch, next_expiry)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn send(&self, queue: &str, body: String) -> Result<MessageId, QueueError> {
        let message_id = Uuid::now_v7().to_string();
        self.lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                message_id: message_id.clone(),
                body,
                receive_count: 0,
                receipt_handle: None,
                invisible_until: None,
            });
        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        if options.max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + options.wait_time;

        loop {
            // Register interest before checking so a concurrent send is never missed.
            let notified = self.notify.notified();

            let (batch, next_expiry) = self.take_visible(queue, options.max_messages);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = next_expiry.map_or(deadline, |t| t.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let mut queues = self.lock();
        let messages = queues.get_mut(queue);

        let position = messages.as_ref().and_then(|q| {
            q.iter()
                .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
        });

        match (messages, position) {
            (Some(q), Some(i)) => {
                q.remove(i);
                Ok(())
            }
            _ => Err(QueueError::ReceiptNotFound {
                queue: queue.to_string(),
                receipt_handle: receipt_handle.to_string(),
            }),
        }
    }
}
