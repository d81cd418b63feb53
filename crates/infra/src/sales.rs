//! Sale recorder: persist a sale, then announce it on the sales queue.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use watchstore_core::{DomainError, EmployeeId, SaleId};
use watchstore_events::{EventKind, EventPublisher, PublishError};
use watchstore_sales::{NewSale, Sale, SaleCreatedPayload};

use crate::store::{SaleStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SaleError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("sale {0} not found")]
    NotFound(SaleId),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The sale is committed but `sale.created` was not enqueued, so its
    /// stock will not be decremented.
    #[error("sale {sale_id} was recorded but not announced: {source}")]
    Publish {
        sale_id: SaleId,
        #[source]
        source: PublishError,
    },
}

#[derive(Clone)]
pub struct SaleRecorder {
    sales: Arc<dyn SaleStore>,
    publisher: EventPublisher,
    sales_queue: String,
}

impl core::fmt::Debug for SaleRecorder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SaleRecorder")
            .field("sales_queue", &self.sales_queue)
            .finish_non_exhaustive()
    }
}

impl SaleRecorder {
    pub fn new(
        sales: Arc<dyn SaleStore>,
        publisher: EventPublisher,
        sales_queue: impl Into<String>,
    ) -> Self {
        Self {
            sales,
            publisher,
            sales_queue: sales_queue.into(),
        }
    }

    /// Validate, persist (sale and lines in one write) and publish `sale.created`.
    ///
    /// The write and the publish are not atomic. A publish failure is
    /// returned as [`SaleError::Publish`] even though the sale stays recorded.
    #[instrument(skip(self, input), fields(employee_id = %employee_id, lines = input.items.len()))]
    pub async fn record(&self, employee_id: EmployeeId, input: NewSale) -> Result<Sale, SaleError> {
        let sale = input.into_sale(SaleId::new(), employee_id, Utc::now())?;
        self.sales.insert(&sale).await?;
        info!(sale_id = %sale.id, "sale recorded");

        let payload = SaleCreatedPayload::from(&sale);
        if let Err(source) = self
            .publisher
            .publish(&self.sales_queue, EventKind::SaleCreated, &payload)
            .await
        {
            error!(
                sale_id = %sale.id,
                error = %source,
                "sale recorded but sale.created not published"
            );
            return Err(SaleError::Publish {
                sale_id: sale.id,
                source,
            });
        }

        Ok(sale)
    }

    pub async fn find_one(&self, id: SaleId) -> Result<Sale, SaleError> {
        self.sales.find(id).await?.ok_or(SaleError::NotFound(id))
    }
}
