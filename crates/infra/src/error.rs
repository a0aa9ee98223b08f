//! Infrastructure error model.
//!
//! Two layers: [`StoreError`] for ledger-store failures and [`LedgerError`], the
//! flattened error every engine operation returns. Domain errors map onto
//! `LedgerError` through `From`, the same way store errors do.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use agroledger_core::{AggregateId, DomainError};

/// Unique index: at most one active remittance per (firm, document number, date, supplier).
pub const ACTIVE_DOCUMENT_CONSTRAINT: &str = "remittance_active_document";
/// Unique index: at most one pending alert per (firm, entity, rule).
pub const PENDING_ALERT_CONSTRAINT: &str = "alert_pending_entity_rule";
/// Primary keys.
pub const PRIMARY_KEY_CONSTRAINT: &str = "primary_key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unique constraint '{constraint}' violated: {detail}")]
    UniqueViolation {
        constraint: &'static str,
        detail: String,
    },

    #[error("version conflict on {record}: expected {expected}, found {actual}")]
    VersionConflict {
        record: String,
        expected: String,
        actual: String,
    },

    #[error("missing record: {0}")]
    MissingRecord(String),

    /// Backend unreachable or internally broken (e.g. lock poisoned).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_unique_violation(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint, .. } if *constraint == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error(
        "insufficient stock of {input_id} at depot {depot_id}: has {available}, needs {requested}"
    )]
    InsufficientStock {
        input_id: AggregateId,
        depot_id: AggregateId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("duplicate document {document_number} dated {date} from supplier {supplier}")]
    DuplicateDocument {
        document_number: String,
        date: NaiveDate,
        supplier: String,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Optimistic concurrency failure (stale record version).
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(StoreError),

    /// Publication failed after a successful commit (at-least-once; the change is durable).
    #[error("publish failed after commit: {0}")]
    Publish(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::VersionConflict {
                record,
                expected,
                actual,
            } => LedgerError::ConcurrencyConflict(format!(
                "{record}: expected {expected}, found {actual}"
            )),
            other => LedgerError::Store(other),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => {
                LedgerError::Validation(format!("invariant violated: {msg}"))
            }
            DomainError::NotFound(what) => LedgerError::NotFound(what),
            DomainError::Conflict(msg) => LedgerError::ConcurrencyConflict(msg),
            DomainError::InsufficientStock {
                input_id,
                depot_id,
                available,
                requested,
            } => LedgerError::InsufficientStock {
                input_id,
                depot_id,
                available,
                requested,
            },
            DomainError::DuplicateDocument {
                document_number,
                date,
                supplier,
            } => LedgerError::DuplicateDocument {
                document_number,
                date,
                supplier,
            },
            DomainError::InvalidTransition(msg) => LedgerError::InvalidTransition(msg),
        }
    }
}
