//! In-memory stores for tests/dev.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use watchstore_core::{ProductId, SaleId};
use watchstore_products::Product;
use watchstore_sales::Sale;

use super::{LineItemLedger, ProductStore, SaleStore, StoreError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    products: Mutex<BTreeMap<ProductId, Product>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn insert(&self, product: &Product) -> Result<(), StoreError> {
        lock(&self.products).insert(product.id, product.clone());
        Ok(())
    }

    async fn find(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(lock(&self.products).get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        Ok(lock(&self.products).values().cloned().collect())
    }

    async fn update(&self, product: &Product) -> Result<bool, StoreError> {
        let mut products = lock(&self.products);
        match products.get_mut(&product.id) {
            Some(existing) => {
                *existing = product.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: ProductId) -> Result<bool, StoreError> {
        Ok(lock(&self.products).remove(&id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySaleStore {
    sales: Mutex<HashMap<SaleId, Sale>>,
}

impl InMemorySaleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SaleStore for InMemorySaleStore {
    async fn insert(&self, sale: &Sale) -> Result<(), StoreError> {
        lock(&self.sales).insert(sale.id, sale.clone());
        Ok(())
    }

    async fn find(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        Ok(lock(&self.sales).get(&id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLineItemLedger {
    applied: Mutex<HashSet<(SaleId, u32)>>,
}

impl InMemoryLineItemLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LineItemLedger for InMemoryLineItemLedger {
    async fn is_applied(&self, sale_id: SaleId, line_no: u32) -> Result<bool, StoreError> {
        Ok(lock(&self.applied).contains(&(sale_id, line_no)))
    }

    async fn mark_applied(&self, sale_id: SaleId, line_no: u32) -> Result<(), StoreError> {
        lock(&self.applied).insert((sale_id, line_no));
        Ok(())
    }
}
