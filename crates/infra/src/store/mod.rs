//! Ledger store boundary.
//!
//! The store is the source of truth for depots, inputs, movements, remittances,
//! alerts and plot observations. Every engine operation runs inside one
//! [`LedgerStore::transaction`]: reads, decisions and writes either all commit
//! or all roll back.
//!
//! Writes carry an [`ExpectedVersion`]; a mismatch fails with
//! [`StoreError::VersionConflict`]. The store enforces two unique constraints:
//! - one active (non-cancelled) remittance per [`DocumentKey`]
//! - one pending alert per (firm, entity, rule)

pub mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use agroledger_alerts::{Alert, AlertId, PlotObservation};
use agroledger_core::{AggregateId, ExpectedVersion, FirmId};
use agroledger_inventory::{Depot, DepotId, Input, InputId, Movement};
use agroledger_reception::{DocumentKey, Remittance, RemittanceId, RemittanceItemId};

use crate::error::StoreError;

pub use in_memory::InMemoryLedgerStore;

/// Operations available inside a store transaction.
///
/// Every read is firm-scoped; records of other firms are invisible.
pub trait LedgerTx {
    fn depot(&self, firm_id: FirmId, depot_id: DepotId) -> Result<Option<Depot>, StoreError>;
    fn depots(&self, firm_id: FirmId) -> Result<Vec<Depot>, StoreError>;
    fn insert_depot(&mut self, depot: Depot) -> Result<(), StoreError>;

    fn input(&self, firm_id: FirmId, input_id: InputId) -> Result<Option<Input>, StoreError>;
    fn inputs(&self, firm_id: FirmId) -> Result<Vec<Input>, StoreError>;
    fn inputs_at_depot(&self, firm_id: FirmId, depot_id: DepotId) -> Result<Vec<Input>, StoreError>;
    fn save_input(&mut self, input: &Input, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Append an immutable movement. Movements are never updated or deleted.
    fn append_movement(&mut self, movement: Movement) -> Result<(), StoreError>;
    /// Movements of one input in registration order.
    fn movements(&self, firm_id: FirmId, input_id: InputId) -> Result<Vec<Movement>, StoreError>;
    /// Latest movement touching the depot as source or destination.
    fn depot_last_movement(
        &self,
        firm_id: FirmId,
        depot_id: DepotId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn remittance(
        &self,
        firm_id: FirmId,
        remittance_id: RemittanceId,
    ) -> Result<Option<Remittance>, StoreError>;
    fn remittance_by_item(
        &self,
        firm_id: FirmId,
        item_id: RemittanceItemId,
    ) -> Result<Option<Remittance>, StoreError>;
    fn remittances(&self, firm_id: FirmId) -> Result<Vec<Remittance>, StoreError>;
    /// The active remittance currently holding `key`, if any.
    fn active_remittance(&self, key: &DocumentKey) -> Result<Option<RemittanceId>, StoreError>;
    fn save_remittance(
        &mut self,
        remittance: &Remittance,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    fn alert(&self, firm_id: FirmId, alert_id: AlertId) -> Result<Option<Alert>, StoreError>;
    fn pending_alerts(&self, firm_id: FirmId) -> Result<Vec<Alert>, StoreError>;
    /// Insert a new alert; fails with a unique violation if one is already pending.
    fn insert_alert(&mut self, alert: &Alert) -> Result<(), StoreError>;
    fn save_alert(&mut self, alert: &Alert, expected: ExpectedVersion) -> Result<(), StoreError>;

    fn plot_observations(&self, firm_id: FirmId) -> Result<Vec<PlotObservation>, StoreError>;
    fn plot_observation(
        &self,
        firm_id: FirmId,
        plot_id: AggregateId,
    ) -> Result<Option<PlotObservation>, StoreError>;
    fn upsert_plot_observation(&mut self, observation: PlotObservation) -> Result<(), StoreError>;
}

/// Transactional ledger store.
pub trait LedgerStore: Send + Sync {
    /// Run `f` atomically. Changes are committed only if `f` returns `Ok`;
    /// concurrent transactions touching the same records are serialized.
    fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<R, E>,
        E: From<StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore,
{
    fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<R, E>,
        E: From<StoreError>,
    {
        (**self).transaction(f)
    }
}
