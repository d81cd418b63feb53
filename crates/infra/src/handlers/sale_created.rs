//! `sale.created`: take every sold line item out of stock.
//!
//! A payload with no lines or a zero-quantity line is rejected before any
//! stock is touched.
//!
//! Line items are decremented concurrently and independently. All of them
//! run to completion even when one fails; the call then reports the first
//! failure observed, which leaves the message on the queue for redelivery.
//!
//! Without a [`LineItemLedger`] a redelivery decrements every line again,
//! including the ones that succeeded the first time. With a ledger, lines
//! already applied for the sale are skipped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use watchstore_core::{DomainError, ProductId, SaleId};
use watchstore_events::{EventHandler, EventKind};
use watchstore_sales::{SaleCreatedPayload, SaleLineItem};

use crate::products::{ProductService, StockError};
use crate::store::{LineItemLedger, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SaleHandlingError {
    #[error("invalid sale: {0}")]
    Invalid(#[from] DomainError),

    #[error("line {line_no}: stock update for product {product_id} failed: {source}")]
    Stock {
        line_no: u32,
        product_id: ProductId,
        #[source]
        source: StockError,
    },

    #[error("line item ledger error: {0}")]
    Ledger(#[from] StoreError),

    #[error("line item task did not complete: {0}")]
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOutcome {
    Applied,
    AlreadyApplied,
}

#[derive(Clone)]
pub struct SaleCreatedHandler {
    products: ProductService,
    ledger: Option<Arc<dyn LineItemLedger>>,
}

impl core::fmt::Debug for SaleCreatedHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SaleCreatedHandler")
            .field("products", &self.products)
            .field("ledger", &self.ledger.is_some())
            .finish()
    }
}

impl SaleCreatedHandler {
    pub fn new(products: ProductService) -> Self {
        Self {
            products,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LineItemLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }
}

#[async_trait]
impl EventHandler for SaleCreatedHandler {
    type Payload = SaleCreatedPayload;
    type Error = SaleHandlingError;

    fn kind(&self) -> EventKind {
        EventKind::SaleCreated
    }

    async fn handle(&self, payload: SaleCreatedPayload) -> Result<(), SaleHandlingError> {
        let sale_id = payload.sale_id;
        payload.validate()?;
        let lines = payload.products.len();

        let mut tasks = JoinSet::new();
        for (line_no, item) in (0u32..).zip(payload.products) {
            tasks.spawn(apply_line(
                self.products.clone(),
                self.ledger.clone(),
                sale_id,
                line_no,
                item,
            ));
        }

        let mut first_error = None;
        let mut applied = 0usize;
        let mut skipped = 0usize;

        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| SaleHandlingError::Join(e.to_string()))
                .and_then(|r| r);
            match result {
                Ok(LineOutcome::Applied) => applied += 1,
                Ok(LineOutcome::AlreadyApplied) => skipped += 1,
                Err(err) => {
                    warn!(%sale_id, error = %err, "sale line item failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(%sale_id, lines, applied, skipped, "sale stock applied");
                Ok(())
            }
        }
    }
}

async fn apply_line(
    products: ProductService,
    ledger: Option<Arc<dyn LineItemLedger>>,
    sale_id: SaleId,
    line_no: u32,
    item: SaleLineItem,
) -> Result<LineOutcome, SaleHandlingError> {
    if let Some(ledger) = &ledger {
        if ledger.is_applied(sale_id, line_no).await? {
            debug!(%sale_id, line_no, "line item already applied");
            return Ok(LineOutcome::AlreadyApplied);
        }
    }

    products
        .decrement(item.product_id, item.quantity)
        .await
        .map_err(|source| SaleHandlingError::Stock {
            line_no,
            product_id: item.product_id,
            source,
        })?;

    if let Some(ledger) = &ledger {
        ledger.mark_applied(sale_id, line_no).await?;
    }
    Ok(LineOutcome::Applied)
}
