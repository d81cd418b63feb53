//! Product catalogue service and the stock update used by the sale handler.
//!
//! Change notifications go to the products queue and are best-effort: a
//! failed publish is logged and never undoes or fails a persisted change.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use watchstore_core::{DomainError, ProductId};
use watchstore_events::{EventKind, EventPublisher};
use watchstore_products::{DEFAULT_LOW_STOCK_THRESHOLD, NewProduct, Product, ProductPatch};

use crate::store::{ProductStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("product {0} not found")]
    NotFound(ProductId),

    /// Nothing was persisted; a `product.low-stock` event was attempted.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    Insufficient {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ProductService {
    products: Arc<dyn ProductStore>,
    publisher: EventPublisher,
    products_queue: String,
    low_stock_threshold: u32,
}

impl core::fmt::Debug for ProductService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProductService")
            .field("products_queue", &self.products_queue)
            .field("low_stock_threshold", &self.low_stock_threshold)
            .finish_non_exhaustive()
    }
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductStore>,
        publisher: EventPublisher,
        products_queue: impl Into<String>,
    ) -> Self {
        Self {
            products,
            publisher,
            products_queue: products_queue.into(),
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
        }
    }

    pub fn with_low_stock_threshold(mut self, threshold: u32) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: NewProduct) -> Result<Product, StockError> {
        let product = input.into_product(ProductId::new(), Utc::now())?;
        self.products.insert(&product).await?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    pub async fn find_all(&self) -> Result<Vec<Product>, StockError> {
        Ok(self.products.list().await?)
    }

    pub async fn find_one(&self, id: ProductId) -> Result<Product, StockError> {
        self.products
            .find(id)
            .await?
            .ok_or(StockError::NotFound(id))
    }

    /// Partial update. Publishes `product.updated` with the new snapshot.
    #[instrument(skip(self, patch), fields(product_id = %id))]
    pub async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<Product, StockError> {
        let mut product = self.find_one(id).await?;
        product.apply_patch(patch, Utc::now())?;
        if !self.products.update(&product).await? {
            return Err(StockError::NotFound(id));
        }
        self.notify(EventKind::ProductUpdated, &product).await;
        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn remove(&self, id: ProductId) -> Result<(), StockError> {
        if !self.products.remove(id).await? {
            return Err(StockError::NotFound(id));
        }
        info!("product removed");
        Ok(())
    }

    /// Take `quantity` units out of stock.
    ///
    /// The read and the write are separate store calls with no lock in
    /// between; two concurrent decrements of one product can both pass the
    /// check and the later write wins.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn decrement(&self, id: ProductId, quantity: u32) -> Result<Product, StockError> {
        let mut product = self.find_one(id).await?;

        if let Err(short) = product.decrement(quantity, Utc::now()) {
            warn!(
                available = short.available,
                requested = short.requested,
                "insufficient stock"
            );
            self.notify(EventKind::ProductLowStock, &product).await;
            return Err(StockError::Insufficient {
                product_id: id,
                available: short.available,
                requested: short.requested,
            });
        }

        if !self.products.update(&product).await? {
            return Err(StockError::NotFound(id));
        }
        info!(remaining = product.quantity, "stock decremented");

        self.notify(EventKind::ProductUpdated, &product).await;
        Ok(product)
    }

    /// Whether the product is below the low-stock threshold. When it is, a
    /// `product.low-stock` event is published.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn check_stock(&self, id: ProductId) -> Result<bool, StockError> {
        let product = self.find_one(id).await?;
        let low = product.is_low_stock(self.low_stock_threshold);
        if low {
            self.notify(EventKind::ProductLowStock, &product).await;
        }
        Ok(low)
    }

    async fn notify(&self, action: EventKind, product: &Product) {
        if let Err(err) = self
            .publisher
            .publish(&self.products_queue, action, product)
            .await
        {
            warn!(%action, product_id = %product.id, error = %err, "product notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    use watchstore_events::InMemoryQueue;

    use crate::store::InMemoryProductStore;

    const PRODUCTS: &str = "products";

    struct Fixture {
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryProductStore>,
        service: ProductService,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryProductStore::new());
        let publisher = EventPublisher::new(queue.clone());
        let service = ProductService::new(store.clone(), publisher, PRODUCTS);
        Fixture {
            queue,
            store,
            service,
        }
    }

    async fn seed(f: &Fixture, quantity: i64) -> Product {
        f.service
            .create(NewProduct {
                name: "Chronograph".to_string(),
                description: Some("steel".to_string()),
                price: 45_000,
                quantity,
            })
            .await
            .unwrap()
    }

    fn published(f: &Fixture) -> Vec<Value> {
        f.queue
            .bodies(PRODUCTS)
            .iter()
            .map(|b| serde_json::from_str(b).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn decrement_within_stock_persists_and_publishes_one_update() {
        let f = fixture();
        let p = seed(&f, 5).await;

        let updated = f.service.decrement(p.id, 3).await.unwrap();
        assert_eq!(updated.quantity, 2);
        assert_eq!(f.store.find(p.id).await.unwrap().unwrap().quantity, 2);

        let events = published(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["action"], "product.updated");
        assert_eq!(events[0]["payload"]["quantity"], 2);
        assert_eq!(events[0]["payload"]["id"], p.id.to_string());
    }

    #[tokio::test]
    async fn decrement_beyond_stock_persists_nothing_and_publishes_low_stock() {
        let f = fixture();
        let p = seed(&f, 1).await;

        let err = f.service.decrement(p.id, 2).await.unwrap_err();
        assert!(matches!(
            err,
            StockError::Insufficient {
                available: 1,
                requested: 2,
                ..
            }
        ));
        assert_eq!(f.store.find(p.id).await.unwrap().unwrap(), p);

        let events = published(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["action"], "product.low-stock");
        assert_eq!(events[0]["payload"]["quantity"], 1);
    }

    #[tokio::test]
    async fn decrement_of_missing_product_is_not_found() {
        let f = fixture();
        let id = ProductId::new();
        let err = f.service.decrement(id, 1).await.unwrap_err();
        assert!(matches!(err, StockError::NotFound(missing) if missing == id));
        assert!(published(&f).is_empty());
    }

    #[tokio::test]
    async fn failed_notification_does_not_fail_the_decrement() {
        let f = fixture();
        let p = seed(&f, 4).await;
        let service = ProductService::new(
            f.store.clone(),
            EventPublisher::new(f.queue.clone()),
            "",
        );

        let updated = service.decrement(p.id, 4).await.unwrap();
        assert_eq!(updated.quantity, 0);
        assert_eq!(f.store.find(p.id).await.unwrap().unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn create_rejects_negative_values() {
        let f = fixture();
        let err = f
            .service
            .create(NewProduct {
                name: "Broken".to_string(),
                description: None,
                price: -5,
                quantity: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::Validation(_)));
        assert!(f.service.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_publishes_snapshot() {
        let f = fixture();
        let p = seed(&f, 5).await;

        let updated = f
            .service
            .update(
                p.id,
                ProductPatch {
                    price: Some(39_900),
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.price, 39_900);

        let events = published(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["action"], "product.updated");
        assert_eq!(events[0]["payload"]["price"], 39_900);
    }

    #[tokio::test]
    async fn remove_then_find_is_not_found() {
        let f = fixture();
        let p = seed(&f, 5).await;

        f.service.remove(p.id).await.unwrap();
        assert!(matches!(
            f.service.find_one(p.id).await,
            Err(StockError::NotFound(_))
        ));
        assert!(matches!(
            f.service.remove(p.id).await,
            Err(StockError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn check_stock_alerts_below_threshold_only() {
        let f = fixture();
        let low = seed(&f, 9).await;
        let fine = seed(&f, 10).await;

        assert!(f.service.check_stock(low.id).await.unwrap());
        assert!(!f.service.check_stock(fine.id).await.unwrap());

        let events = published(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["action"], "product.low-stock");
        assert_eq!(events[0]["payload"]["id"], low.id.to_string());
    }

    #[tokio::test]
    async fn custom_threshold_is_respected() {
        let f = fixture();
        let service = f.service.clone().with_low_stock_threshold(3);
        let p = seed(&f, 5).await;
        assert!(!service.check_stock(p.id).await.unwrap());
    }
}
