//! Sales domain module.
//!
//! Sale records, their line items and the `sale.created` payload. Pure
//! domain logic; persistence and publishing live in infra.

pub mod sale;

pub use sale::{NewSale, Sale, SaleCreatedPayload, SaleLineItem};
