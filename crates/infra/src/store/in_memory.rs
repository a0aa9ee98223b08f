use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use agroledger_alerts::{Alert, AlertId, EntityRef, PlotObservation};
use agroledger_core::{AggregateId, AggregateRoot, ExpectedVersion, FirmId};
use agroledger_inventory::{Depot, DepotId, Input, InputId, Movement};
use agroledger_reception::{DocumentKey, Remittance, RemittanceId, RemittanceItemId};

use super::{LedgerStore, LedgerTx};
use crate::error::{
    ACTIVE_DOCUMENT_CONSTRAINT, PENDING_ALERT_CONSTRAINT, PRIMARY_KEY_CONSTRAINT, StoreError,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingAlertKey {
    firm_id: FirmId,
    entity: EntityRef,
    rule_id: String,
}

impl PendingAlertKey {
    fn of(alert: &Alert) -> Self {
        Self {
            firm_id: alert.firm_id,
            entity: alert.entity,
            rule_id: alert.rule_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    depots: HashMap<DepotId, Depot>,
    inputs: HashMap<InputId, Input>,
    movements: Vec<Movement>,
    depot_activity: HashMap<DepotId, DateTime<Utc>>,
    remittances: HashMap<RemittanceId, Remittance>,
    active_documents: HashMap<DocumentKey, RemittanceId>,
    alerts: HashMap<AlertId, Alert>,
    pending_alerts: HashMap<PendingAlertKey, AlertId>,
    plots: HashMap<(FirmId, AggregateId), PlotObservation>,
}

/// Previous state of one written row, replayed in reverse on rollback.
#[derive(Debug)]
enum Undo {
    Depot(DepotId, Option<Depot>),
    Input(InputId, Option<Input>),
    Movement(Vec<(DepotId, Option<DateTime<Utc>>)>),
    Remittance(RemittanceId, Option<Remittance>),
    ActiveDocument(DocumentKey, Option<RemittanceId>),
    Alert(AlertId, Option<Alert>),
    PendingAlert(PendingAlertKey, Option<AlertId>),
    Plot((FirmId, AggregateId), Option<PlotObservation>),
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Writers are serialized behind one mutex; a
/// transaction mutates the tables in place and keeps an undo log that is
/// replayed if the transaction body fails.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: Mutex<Tables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<R, E>,
        E: From<StoreError>,
    {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("ledger store lock poisoned".to_string()))?;

        let mut tx = InMemoryTx {
            tables: &mut tables,
            undo: Vec::new(),
        };
        match f(&mut tx) {
            Ok(value) => Ok(value),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }
}

struct InMemoryTx<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

fn restore<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(v) => {
            map.insert(key, v);
        }
        None => {
            map.remove(&key);
        }
    }
}

fn check_version(
    record: String,
    expected: ExpectedVersion,
    actual: Option<u64>,
) -> Result<(), StoreError> {
    if expected.matches(actual) {
        return Ok(());
    }
    Err(StoreError::VersionConflict {
        record,
        expected: format!("{expected:?}"),
        actual: format!("{actual:?}"),
    })
}

impl InMemoryTx<'_> {
    fn rollback(&mut self) {
        while let Some(step) = self.undo.pop() {
            let t = &mut *self.tables;
            match step {
                Undo::Depot(k, v) => restore(&mut t.depots, k, v),
                Undo::Input(k, v) => restore(&mut t.inputs, k, v),
                Undo::Movement(activity) => {
                    t.movements.pop();
                    for (depot_id, previous) in activity {
                        restore(&mut t.depot_activity, depot_id, previous);
                    }
                }
                Undo::Remittance(k, v) => restore(&mut t.remittances, k, v),
                Undo::ActiveDocument(k, v) => restore(&mut t.active_documents, k, v),
                Undo::Alert(k, v) => restore(&mut t.alerts, k, v),
                Undo::PendingAlert(k, v) => restore(&mut t.pending_alerts, k, v),
                Undo::Plot(k, v) => restore(&mut t.plots, k, v),
            }
        }
    }

    fn set_active_document(&mut self, key: DocumentKey, value: Option<RemittanceId>) {
        let previous = match value {
            Some(id) => self.tables.active_documents.insert(key.clone(), id),
            None => self.tables.active_documents.remove(&key),
        };
        self.undo.push(Undo::ActiveDocument(key, previous));
    }

    fn set_pending_alert(&mut self, key: PendingAlertKey, value: Option<AlertId>) {
        let previous = match value {
            Some(id) => self.tables.pending_alerts.insert(key.clone(), id),
            None => self.tables.pending_alerts.remove(&key),
        };
        self.undo.push(Undo::PendingAlert(key, previous));
    }
}

impl LedgerTx for InMemoryTx<'_> {
    fn depot(&self, firm_id: FirmId, depot_id: DepotId) -> Result<Option<Depot>, StoreError> {
        Ok(self
            .tables
            .depots
            .get(&depot_id)
            .filter(|d| d.firm_id == firm_id)
            .cloned())
    }

    fn depots(&self, firm_id: FirmId) -> Result<Vec<Depot>, StoreError> {
        let mut out: Vec<Depot> = self
            .tables
            .depots
            .values()
            .filter(|d| d.firm_id == firm_id)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    fn insert_depot(&mut self, depot: Depot) -> Result<(), StoreError> {
        if self.tables.depots.contains_key(&depot.id) {
            return Err(StoreError::UniqueViolation {
                constraint: PRIMARY_KEY_CONSTRAINT,
                detail: format!("depot {} already exists", depot.id),
            });
        }
        let id = depot.id;
        self.tables.depots.insert(id, depot);
        self.undo.push(Undo::Depot(id, None));
        Ok(())
    }

    fn input(&self, firm_id: FirmId, input_id: InputId) -> Result<Option<Input>, StoreError> {
        Ok(self
            .tables
            .inputs
            .get(&input_id)
            .filter(|i| i.firm_id() == Some(firm_id))
            .cloned())
    }

    fn inputs(&self, firm_id: FirmId) -> Result<Vec<Input>, StoreError> {
        let mut out: Vec<Input> = self
            .tables
            .inputs
            .values()
            .filter(|i| i.firm_id() == Some(firm_id))
            .cloned()
            .collect();
        out.sort_by_key(|i| i.id_typed());
        Ok(out)
    }

    fn inputs_at_depot(
        &self,
        firm_id: FirmId,
        depot_id: DepotId,
    ) -> Result<Vec<Input>, StoreError> {
        Ok(self
            .inputs(firm_id)?
            .into_iter()
            .filter(|i| i.depot_id() == Some(depot_id))
            .collect())
    }

    fn save_input(&mut self, input: &Input, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = input.id_typed();
        let current = self.tables.inputs.get(&id).map(|i| i.version());
        check_version(format!("input {id}"), expected, current)?;

        let previous = self.tables.inputs.insert(id, input.clone());
        self.undo.push(Undo::Input(id, previous));
        Ok(())
    }

    fn append_movement(&mut self, movement: Movement) -> Result<(), StoreError> {
        let mut activity = Vec::with_capacity(2);
        for depot_id in std::iter::once(movement.depot_id).chain(movement.destination_depot_id) {
            let previous = self.tables.depot_activity.get(&depot_id).copied();
            if previous.is_none_or(|at| at < movement.occurred_at) {
                self.tables.depot_activity.insert(depot_id, movement.occurred_at);
            }
            activity.push((depot_id, previous));
        }
        self.tables.movements.push(movement);
        self.undo.push(Undo::Movement(activity));
        Ok(())
    }

    fn movements(&self, firm_id: FirmId, input_id: InputId) -> Result<Vec<Movement>, StoreError> {
        Ok(self
            .tables
            .movements
            .iter()
            .filter(|m| m.firm_id == firm_id && m.input_id == input_id)
            .cloned()
            .collect())
    }

    fn depot_last_movement(
        &self,
        firm_id: FirmId,
        depot_id: DepotId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        if self.depot(firm_id, depot_id)?.is_none() {
            return Ok(None);
        }
        Ok(self.tables.depot_activity.get(&depot_id).copied())
    }

    fn remittance(
        &self,
        firm_id: FirmId,
        remittance_id: RemittanceId,
    ) -> Result<Option<Remittance>, StoreError> {
        Ok(self
            .tables
            .remittances
            .get(&remittance_id)
            .filter(|r| r.firm_id() == Some(firm_id))
            .cloned())
    }

    fn remittance_by_item(
        &self,
        firm_id: FirmId,
        item_id: RemittanceItemId,
    ) -> Result<Option<Remittance>, StoreError> {
        Ok(self
            .tables
            .remittances
            .values()
            .find(|r| r.firm_id() == Some(firm_id) && r.item(item_id).is_some())
            .cloned())
    }

    fn remittances(&self, firm_id: FirmId) -> Result<Vec<Remittance>, StoreError> {
        let mut out: Vec<Remittance> = self
            .tables
            .remittances
            .values()
            .filter(|r| r.firm_id() == Some(firm_id))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id_typed());
        Ok(out)
    }

    fn active_remittance(&self, key: &DocumentKey) -> Result<Option<RemittanceId>, StoreError> {
        Ok(self.tables.active_documents.get(key).copied())
    }

    fn save_remittance(
        &mut self,
        remittance: &Remittance,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let id = remittance.id_typed();
        let stored = self.tables.remittances.get(&id);
        check_version(format!("remittance {id}"), expected, stored.map(|r| r.version()))?;

        let previous_key = stored
            .filter(|r| r.is_active())
            .and_then(|r| r.document_key());
        let next_key = Some(remittance)
            .filter(|r| r.is_active())
            .and_then(|r| r.document_key());

        if let Some(key) = &next_key {
            if let Some(holder) = self.tables.active_documents.get(key) {
                if *holder != id {
                    return Err(StoreError::UniqueViolation {
                        constraint: ACTIVE_DOCUMENT_CONSTRAINT,
                        detail: format!(
                            "document {} is already held by remittance {holder}",
                            key.document_number
                        ),
                    });
                }
            }
        }

        if previous_key != next_key {
            if let Some(key) = previous_key {
                self.set_active_document(key, None);
            }
            if let Some(key) = next_key {
                self.set_active_document(key, Some(id));
            }
        }

        let previous = self.tables.remittances.insert(id, remittance.clone());
        self.undo.push(Undo::Remittance(id, previous));
        Ok(())
    }

    fn alert(&self, firm_id: FirmId, alert_id: AlertId) -> Result<Option<Alert>, StoreError> {
        Ok(self
            .tables
            .alerts
            .get(&alert_id)
            .filter(|a| a.firm_id == firm_id)
            .cloned())
    }

    fn pending_alerts(&self, firm_id: FirmId) -> Result<Vec<Alert>, StoreError> {
        let mut out: Vec<Alert> = self
            .tables
            .pending_alerts
            .iter()
            .filter(|(k, _)| k.firm_id == firm_id)
            .filter_map(|(_, id)| self.tables.alerts.get(id))
            .cloned()
            .collect();
        out.sort_by_key(|a| (a.created_at, a.id));
        Ok(out)
    }

    fn insert_alert(&mut self, alert: &Alert) -> Result<(), StoreError> {
        if self.tables.alerts.contains_key(&alert.id) {
            return Err(StoreError::UniqueViolation {
                constraint: PRIMARY_KEY_CONSTRAINT,
                detail: format!("alert {} already exists", alert.id),
            });
        }
        if alert.is_pending() {
            let key = PendingAlertKey::of(alert);
            if self.tables.pending_alerts.contains_key(&key) {
                return Err(StoreError::UniqueViolation {
                    constraint: PENDING_ALERT_CONSTRAINT,
                    detail: format!("'{}' already pending for {}", alert.rule_id, alert.entity),
                });
            }
            self.set_pending_alert(key, Some(alert.id));
        }
        self.tables.alerts.insert(alert.id, alert.clone());
        self.undo.push(Undo::Alert(alert.id, None));
        Ok(())
    }

    fn save_alert(&mut self, alert: &Alert, expected: ExpectedVersion) -> Result<(), StoreError> {
        let Some(stored) = self.tables.alerts.get(&alert.id) else {
            return Err(StoreError::MissingRecord(format!("alert {}", alert.id)));
        };
        check_version(format!("alert {}", alert.id), expected, Some(stored.version))?;

        if stored.is_pending() && !alert.is_pending() {
            self.set_pending_alert(PendingAlertKey::of(alert), None);
        }
        let previous = self.tables.alerts.insert(alert.id, alert.clone());
        self.undo.push(Undo::Alert(alert.id, previous));
        Ok(())
    }

    fn plot_observations(&self, firm_id: FirmId) -> Result<Vec<PlotObservation>, StoreError> {
        let mut out: Vec<PlotObservation> = self
            .tables
            .plots
            .iter()
            .filter(|((firm, _), _)| *firm == firm_id)
            .map(|(_, obs)| obs.clone())
            .collect();
        out.sort_by_key(|o| o.plot_id);
        Ok(out)
    }

    fn plot_observation(
        &self,
        firm_id: FirmId,
        plot_id: AggregateId,
    ) -> Result<Option<PlotObservation>, StoreError> {
        Ok(self.tables.plots.get(&(firm_id, plot_id)).cloned())
    }

    fn upsert_plot_observation(&mut self, observation: PlotObservation) -> Result<(), StoreError> {
        let key = (observation.firm_id, observation.plot_id);
        let previous = self.tables.plots.insert(key, observation);
        self.undo.push(Undo::Plot(key, previous));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use agroledger_core::{Aggregate, Quantity};
    use agroledger_inventory::{CreateInput, InputCategory, InputCommand};
    use agroledger_reception::{
        CreateRemittance, NewRemittanceItem, RemittanceCommand, RemittanceItemId, Supplier,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn new_input(firm_id: FirmId, depot_id: DepotId) -> Input {
        let input_id = InputId::generate();
        let mut input = Input::empty(input_id);
        input
            .execute(&InputCommand::CreateInput(CreateInput {
                firm_id,
                input_id,
                name: "Urea".to_string(),
                unit: "kg".to_string(),
                category: InputCategory::Fertilizer,
                depot_id,
                expires_on: None,
                minimum_stock: None,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        input
    }

    fn new_remittance(firm_id: FirmId, document_number: &str) -> Remittance {
        let remittance_id = RemittanceId::generate();
        let mut remittance = Remittance::empty(remittance_id);
        remittance
            .execute(&RemittanceCommand::CreateRemittance(CreateRemittance {
                firm_id,
                remittance_id,
                document_number: document_number.to_string(),
                date: NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
                supplier: Supplier::new("Coop Agro", None),
                depot_id: DepotId::generate(),
                items: vec![NewRemittanceItem {
                    item_id: RemittanceItemId::generate(),
                    description: "Urea".to_string(),
                    unit: "kg".to_string(),
                    category: InputCategory::Fertilizer,
                    quantity_ordered: Quantity::new(dec!(10)).unwrap(),
                    input_id: None,
                    batch: None,
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap();
        remittance
    }

    #[test]
    fn failed_transaction_rolls_back_every_write() {
        let store = InMemoryLedgerStore::new();
        let firm_id = FirmId::new();
        let input = new_input(firm_id, DepotId::generate());

        let result: Result<(), LedgerError> = store.transaction(|tx| {
            tx.save_input(&input, ExpectedVersion::New)?;
            Err(LedgerError::Validation("boom".to_string()))
        });
        assert!(result.is_err());

        let found = store
            .transaction(|tx| tx.input(firm_id, input.id_typed()))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn stale_versions_are_rejected() {
        let store = InMemoryLedgerStore::new();
        let firm_id = FirmId::new();
        let input = new_input(firm_id, DepotId::generate());
        store
            .transaction(|tx| tx.save_input(&input, ExpectedVersion::New))
            .unwrap();

        let err = store
            .transaction(|tx| tx.save_input(&input, ExpectedVersion::New))
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let err = store
            .transaction(|tx| tx.save_input(&input, ExpectedVersion::Exact(7)))
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[test]
    fn only_one_active_remittance_per_document() {
        let store = InMemoryLedgerStore::new();
        let firm_id = FirmId::new();
        let first = new_remittance(firm_id, "R-100");
        let second = new_remittance(firm_id, "r-100 ");

        store
            .transaction(|tx| tx.save_remittance(&first, ExpectedVersion::New))
            .unwrap();
        let err = store
            .transaction(|tx| tx.save_remittance(&second, ExpectedVersion::New))
            .unwrap_err();
        assert!(err.is_unique_violation(ACTIVE_DOCUMENT_CONSTRAINT));

        let other_firm = new_remittance(FirmId::new(), "R-100");
        store
            .transaction(|tx| tx.save_remittance(&other_firm, ExpectedVersion::New))
            .unwrap();
    }

    #[test]
    fn reads_are_firm_scoped() {
        let store = InMemoryLedgerStore::new();
        let firm_id = FirmId::new();
        let input = new_input(firm_id, DepotId::generate());
        store
            .transaction(|tx| tx.save_input(&input, ExpectedVersion::New))
            .unwrap();

        let (own, foreign) = store
            .transaction(|tx| {
                Ok::<_, StoreError>((tx.inputs(firm_id)?, tx.inputs(FirmId::new())?))
            })
            .unwrap();
        assert_eq!(own.len(), 1);
        assert!(foreign.is_empty());
    }
}
