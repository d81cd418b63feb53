//! `watchstore-core`: shared domain primitives.
//!
//! Identifiers, the domain error model and the entity marker trait. No IO.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EmployeeId, ProductId, SaleId};
