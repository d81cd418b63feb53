use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::event::EventKind;

/// Handles the payload of one event kind.
///
/// Handlers map one-to-one to an [`EventKind`]. Returning an error means the
/// message was not handled and must stay on the queue for redelivery, so a
/// handler has to tolerate running more than once for the same message.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Payload: DeserializeOwned + Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// The event kind this handler is registered for.
    fn kind(&self) -> EventKind;

    async fn handle(&self, payload: Self::Payload) -> Result<(), Self::Error>;
}

/// Failure of a type-erased handler invocation.
#[derive(Debug)]
pub(crate) enum ErasedFailure {
    Payload(serde_json::Error),
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

/// Object-safe form of [`EventHandler`] used by the dispatcher's routing table.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn handle_json(&self, payload: JsonValue) -> Result<(), ErasedFailure>;
}

#[async_trait]
impl<H> ErasedHandler for H
where
    H: EventHandler,
{
    async fn handle_json(&self, payload: JsonValue) -> Result<(), ErasedFailure> {
        let typed: H::Payload = serde_json::from_value(payload).map_err(ErasedFailure::Payload)?;
        self.handle(typed)
            .await
            .map_err(|e| ErasedFailure::Handler(Box::new(e)))
    }
}
