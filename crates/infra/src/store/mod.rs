//! Persistence seams for products, sales and applied sale lines.
//!
//! Services depend on these traits only. In-memory implementations back the
//! tests; Postgres implementations back the worker.

use async_trait::async_trait;

use watchstore_core::{ProductId, SaleId};
use watchstore_products::Product;
use watchstore_sales::Sale;

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryLineItemLedger, InMemoryProductStore, InMemorySaleStore};
pub use postgres::{PostgresLineItemLedger, PostgresProductStore, PostgresSaleStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A value does not fit the storage representation (or vice versa).
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

/// Product rows. Writes are plain overwrites with no row locking and no
/// version check; read-then-write callers can race each other.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert(&self, product: &Product) -> Result<(), StoreError>;

    async fn find(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn list(&self) -> Result<Vec<Product>, StoreError>;

    /// Overwrite an existing product. Returns `false` when it does not exist.
    async fn update(&self, product: &Product) -> Result<bool, StoreError>;

    /// Returns `false` when it did not exist.
    async fn remove(&self, id: ProductId) -> Result<bool, StoreError>;
}

/// Sale aggregates (sale + line items), written atomically.
#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn insert(&self, sale: &Sale) -> Result<(), StoreError>;

    async fn find(&self, id: SaleId) -> Result<Option<Sale>, StoreError>;
}

/// Records which line items of a sale have already had their stock applied,
/// so a redelivered `sale.created` can skip them.
#[async_trait]
pub trait LineItemLedger: Send + Sync {
    async fn is_applied(&self, sale_id: SaleId, line_no: u32) -> Result<bool, StoreError>;

    /// Idempotent.
    async fn mark_applied(&self, sale_id: SaleId, line_no: u32) -> Result<(), StoreError>;
}
