//! Products domain module.
//!
//! Catalogue records and the stock rules applied to them, as plain
//! deterministic logic (no IO, no queues, no storage).

pub mod product;

pub use product::{
    DEFAULT_LOW_STOCK_THRESHOLD, InsufficientStock, NewProduct, Product, ProductPatch,
};
