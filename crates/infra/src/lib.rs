//! Infrastructure layer: storage, queue clients, services, handlers and workers.

pub mod config;
pub mod handlers;
pub mod products;
pub mod queue;
pub mod sales;
pub mod store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{AppConfig, ConfigError};
pub use handlers::build_dispatcher;
pub use products::{ProductService, StockError};
pub use sales::{SaleError, SaleRecorder};
