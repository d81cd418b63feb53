//! Routes raw queue message bodies to the handler registered for their action.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::envelope::RawEvent;
use crate::event::EventKind;
use crate::handler::{ErasedFailure, ErasedHandler, EventHandler};

/// What happened to a successfully dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A registered handler processed the payload.
    Handled(EventKind),
    /// The action is unknown (or has no handler here); the message is consumed anyway.
    Ignored { action: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The body is not an `{ action, payload }` envelope, or the payload does
    /// not fit its action. Redelivery will fail the same way.
    #[error("malformed event: {reason}")]
    Malformed {
        action: Option<EventKind>,
        reason: String,
    },

    /// The handler ran and failed.
    #[error("{action} handler failed: {source}")]
    Handler {
        action: EventKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl DispatchError {
    pub fn action(&self) -> Option<EventKind> {
        match self {
            DispatchError::Malformed { action, .. } => *action,
            DispatchError::Handler { action, .. } => Some(*action),
        }
    }
}

/// Event dispatcher: one handler per [`EventKind`].
///
/// Unknown actions are logged and treated as handled so that unrelated event
/// kinds on a shared queue do not jam the consumer.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Arc<dyn ErasedHandler>>,
}

impl core::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for its [`EventHandler::kind`], replacing any previous one.
    pub fn register<H>(&mut self, handler: H) -> &mut Self
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.register(handler);
        self
    }

    /// Parse `body` and route it.
    pub async fn dispatch(&self, body: &str) -> Result<DispatchOutcome, DispatchError> {
        let raw = RawEvent::parse(body).map_err(|e| DispatchError::Malformed {
            action: None,
            reason: e.to_string(),
        })?;

        let Some((kind, handler)) = raw
            .action
            .parse::<EventKind>()
            .ok()
            .and_then(|kind| self.handlers.get(&kind).map(|h| (kind, h)))
        else {
            warn!(action = %raw.action, "unhandled event type received");
            return Ok(DispatchOutcome::Ignored { action: raw.action });
        };

        debug!(action = %kind, "dispatching event");

        match handler.handle_json(raw.payload).await {
            Ok(()) => Ok(DispatchOutcome::Handled(kind)),
            Err(ErasedFailure::Payload(e)) => Err(DispatchError::Malformed {
                action: Some(kind),
                reason: e.to_string(),
            }),
            Err(ErasedFailure::Handler(source)) => Err(DispatchError::Handler {
                action: kind,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize)]
    struct Ping {
        id: u32,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<u32>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        type Payload = Ping;
        type Error = Boom;

        fn kind(&self) -> EventKind {
            EventKind::ProductUpdated
        }

        async fn handle(&self, payload: Ping) -> Result<(), Boom> {
            self.seen.lock().unwrap().push(payload.id);
            if self.fail { Err(Boom) } else { Ok(()) }
        }
    }

    fn dispatcher(fail: bool) -> (EventDispatcher, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let d = EventDispatcher::new().with_handler(Recorder {
            seen: seen.clone(),
            fail,
        });
        (d, seen)
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let (d, seen) = dispatcher(false);
        let outcome = d
            .dispatch(r#"{"action":"product.updated","payload":{"id":7}}"#)
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled(EventKind::ProductUpdated));
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn unknown_action_is_ignored_without_error() {
        let (d, seen) = dispatcher(false);
        let outcome = d
            .dispatch(r#"{"action":"order.shipped","payload":{}}"#)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Ignored {
                action: "order.shipped".to_string()
            }
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn known_action_without_handler_is_ignored() {
        let (d, _) = dispatcher(false);
        let outcome = d
            .dispatch(r#"{"action":"sale.created","payload":{}}"#)
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let (d, _) = dispatcher(false);
        let err = d.dispatch("{not json").await.unwrap_err();
        assert!(matches!(err, DispatchError::Malformed { action: None, .. }));
    }

    #[tokio::test]
    async fn payload_that_does_not_fit_is_malformed() {
        let (d, seen) = dispatcher(false);
        let err = d
            .dispatch(r#"{"action":"product.updated","payload":{"id":"seven"}}"#)
            .await
            .unwrap_err();
        assert_eq!(err.action(), Some(EventKind::ProductUpdated));
        assert!(matches!(err, DispatchError::Malformed { .. }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_failure_is_propagated() {
        let (d, seen) = dispatcher(true);
        let err = d
            .dispatch(r#"{"action":"product.updated","payload":{"id":1}}"#)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Handler {
                action: EventKind::ProductUpdated,
                ..
            }
        ));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
