//! Ledger event contract.

use chrono::{DateTime, Utc};

use agroledger_core::FirmId;

/// A fact recorded by one of the ledger aggregates.
///
/// Event types are dotted names, module first (`inventory.movement.registered`,
/// `reception.remittance.cancelled`, `alerts.alert.raised`). Every event
/// belongs to exactly one firm; envelopes take their firm from it.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    /// Payload schema version. Bump when the serialized shape changes.
    fn version(&self) -> u32 {
        1
    }

    fn firm_id(&self) -> FirmId;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
