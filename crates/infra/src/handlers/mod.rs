//! Event handlers consumed by the queue pollers.
//!
//! `sale.created` drives stock decrements. The product events only log; they
//! exist so that the products queue drains instead of redelivering forever.

use std::sync::Arc;

use watchstore_events::EventDispatcher;

use crate::products::ProductService;
use crate::store::LineItemLedger;

pub mod product_low_stock;
pub mod product_updated;
pub mod sale_created;

pub use product_low_stock::ProductLowStockHandler;
pub use product_updated::{ProductNotice, ProductUpdatedHandler};
pub use sale_created::{SaleCreatedHandler, SaleHandlingError};

/// Dispatcher with every handler registered.
///
/// With a ledger, redelivered `sale.created` messages skip the line items
/// that were already applied.
pub fn build_dispatcher(
    products: ProductService,
    ledger: Option<Arc<dyn LineItemLedger>>,
) -> EventDispatcher {
    let mut sale_created = SaleCreatedHandler::new(products);
    if let Some(ledger) = ledger {
        sale_created = sale_created.with_ledger(ledger);
    }

    EventDispatcher::new()
        .with_handler(sale_created)
        .with_handler(ProductUpdatedHandler)
        .with_handler(ProductLowStockHandler)
}
