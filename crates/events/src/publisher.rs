//! Event publisher: serialize a typed event and enqueue it on a named queue.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::event::{Event, EventKind};
use crate::queue::{MessageId, QueueClient, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The target queue address is not configured. Not retried.
    #[error("queue address for {action} is not configured")]
    Configuration { action: EventKind },

    #[error("failed to serialize {action} event: {source}")]
    Serialization {
        action: EventKind,
        #[source]
        source: serde_json::Error,
    },

    /// The queue rejected or never received the message. The caller decides
    /// whether to retry.
    #[error("failed to enqueue {action} event on {queue}: {source}")]
    Transport {
        action: EventKind,
        queue: String,
        #[source]
        source: QueueError,
    },
}

/// Publishes `{ action, payload }` messages through the shared queue client.
///
/// Exactly one enqueue attempt per call; there is no internal retry or backoff.
#[derive(Clone)]
pub struct EventPublisher {
    client: Arc<dyn QueueClient>,
}

impl core::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}

impl EventPublisher {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Self { client }
    }

    /// Publish one event to `queue`.
    ///
    /// A blank `queue` is a configuration error and nothing is sent.
    pub async fn publish<P>(
        &self,
        queue: &str,
        action: EventKind,
        payload: &P,
    ) -> Result<MessageId, PublishError>
    where
        P: Serialize + ?Sized + Sync,
    {
        if queue.trim().is_empty() {
            error!(%action, "queue address is not configured");
            return Err(PublishError::Configuration { action });
        }

        let body = serde_json::to_string(&Event::new(action, payload))
            .map_err(|source| PublishError::Serialization { action, source })?;

        match self.client.send(queue, body).await {
            Ok(message_id) => {
                info!(%action, queue, message_id = %message_id, "event published");
                Ok(message_id)
            }
            Err(source) => {
                error!(%action, queue, error = %source, "failed to publish event");
                Err(PublishError::Transport {
                    action,
                    queue: queue.to_string(),
                    source,
                })
            }
        }
    }
}
