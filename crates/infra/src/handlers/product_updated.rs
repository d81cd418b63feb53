use std::convert::Infallible;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use watchstore_core::ProductId;
use watchstore_events::{EventHandler, EventKind};

/// The parts of a product snapshot the product handlers look at.
///
/// Only `id` is required so that older or trimmed snapshots still decode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductNotice {
    pub id: ProductId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProductUpdatedHandler;

#[async_trait]
impl EventHandler for ProductUpdatedHandler {
    type Payload = ProductNotice;
    type Error = Infallible;

    fn kind(&self) -> EventKind {
        EventKind::ProductUpdated
    }

    async fn handle(&self, payload: ProductNotice) -> Result<(), Infallible> {
        info!(
            product_id = %payload.id,
            name = payload.name.as_deref().unwrap_or_default(),
            quantity = payload.quantity,
            "product updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchstore_events::{DispatchOutcome, EventDispatcher};

    #[tokio::test]
    async fn accepts_full_and_minimal_snapshots() {
        let d = EventDispatcher::new().with_handler(ProductUpdatedHandler);
        let id = ProductId::new();

        let full = format!(
            r#"{{"action":"product.updated","payload":{{"id":"{id}","name":"Diver","description":null,"price":100,"quantity":4,"createdAt":"2024-03-14T12:00:00Z","updatedAt":"2024-03-14T12:00:00Z"}}}}"#
        );
        let minimal = format!(r#"{{"action":"product.updated","payload":{{"id":"{id}"}}}}"#);

        for body in [full, minimal] {
            assert_eq!(
                d.dispatch(&body).await.unwrap(),
                DispatchOutcome::Handled(EventKind::ProductUpdated)
            );
        }
    }

    #[tokio::test]
    async fn snapshot_without_id_is_malformed() {
        let d = EventDispatcher::new().with_handler(ProductUpdatedHandler);
        let err = d
            .dispatch(r#"{"action":"product.updated","payload":{"quantity":4}}"#)
            .await
            .unwrap_err();
        assert_eq!(err.action(), Some(EventKind::ProductUpdated));
    }
}
