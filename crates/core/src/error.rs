//! Domain error model.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::AggregateId;

pub type DomainResult<T> = Result<T, DomainError>;

/// Why an aggregate or value refused a command. Deterministic: the same state
/// and command always yield the same error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input: blank reference, non-positive quantity, unknown depot.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A command addressed to the wrong aggregate or firm.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Creating something that already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An exit or decreasing adjustment would drive the balance below zero.
    #[error(
        "insufficient stock of {input_id} at depot {depot_id}: has {available}, needs {requested}"
    )]
    InsufficientStock {
        input_id: AggregateId,
        depot_id: AggregateId,
        available: Decimal,
        requested: Decimal,
    },

    /// An active delivery document with the same identity already exists.
    #[error("duplicate document {document_number} dated {date} from supplier {supplier}")]
    DuplicateDocument {
        document_number: String,
        date: NaiveDate,
        supplier: String,
    },

    /// Terminal document, shrinking receipt or closed alert.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }
}
