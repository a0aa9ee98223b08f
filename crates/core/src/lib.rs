//! Domain primitives shared by the ledger crates: identifiers, quantities,
//! the aggregate contract and the domain error type. No IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, FirmId, UserId};
pub use quantity::Quantity;
