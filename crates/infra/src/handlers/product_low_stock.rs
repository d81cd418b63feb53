use std::convert::Infallible;

use async_trait::async_trait;
use tracing::warn;

use watchstore_events::{EventHandler, EventKind};

use super::product_updated::ProductNotice;

/// Surfaces low-stock alerts in the logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductLowStockHandler;

#[async_trait]
impl EventHandler for ProductLowStockHandler {
    type Payload = ProductNotice;
    type Error = Infallible;

    fn kind(&self) -> EventKind {
        EventKind::ProductLowStock
    }

    async fn handle(&self, payload: ProductNotice) -> Result<(), Infallible> {
        warn!(
            product_id = %payload.id,
            name = payload.name.as_deref().unwrap_or_default(),
            quantity = payload.quantity,
            "product stock is low"
        );
        Ok(())
    }
}
