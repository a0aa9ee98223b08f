//! Reception domain module (delivery documents / remittances, event-sourced).
//!
//! This crate contains the receipt state machine and the delta computation for
//! cumulative goods receipts, implemented purely as deterministic domain logic
//! (no IO, no storage). Turning booked deltas into stock movements is done by
//! the infrastructure layer inside the same store transaction.

pub mod remittance;

pub use remittance::{
    BatchInfo, CancelRemittance, Cancellation, CreateRemittance, DeltaDisposition, DocumentKey,
    InputLink, InputLinked, ItemReceipt, ItemsReceived, LinkInput, NewRemittanceItem, Receipt,
    ReceivedLine, RecordReceipt, Remittance, RemittanceCancelled, RemittanceCommand,
    RemittanceCreated, RemittanceEvent, RemittanceId, RemittanceItem, RemittanceItemId,
    RemittanceStatus, StatusChanged, Supplier,
};
