//! Reception reconciliation engine.
//!
//! Registers delivery documents and reconciles cumulative receipts against
//! them. Positive deltas on linked lines become entry movements in the same
//! transaction; deltas on unlinked lines are held on the line until an input
//! is linked, then booked as one entry.
//!
//! A stale remittance version surfaces as [`LedgerError::ConcurrencyConflict`];
//! mutating operations retry once before returning it.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use agroledger_core::{AggregateRoot, ExpectedVersion, FirmId, Quantity, UserId};
use agroledger_events::{EventBus, EventEnvelope};
use agroledger_inventory::{DepotId, Input, InputCategory, InputId, Movement, MovementKind};
use agroledger_reception::{
    BatchInfo, CancelRemittance, CreateRemittance, DeltaDisposition, DocumentKey, LinkInput,
    NewRemittanceItem, RecordReceipt, Remittance, RemittanceCommand, RemittanceEvent,
    RemittanceId, RemittanceItem, RemittanceItemId, RemittanceStatus, Supplier,
};

pub use agroledger_reception::ItemReceipt;

use crate::error::{ACTIVE_DOCUMENT_CONSTRAINT, LedgerError, StoreError};
use crate::publish::{Outbox, REMITTANCE_AGGREGATE, execute};
use crate::stock_ledger::{
    MovementRequest, NewInput, book_movement, create_input_in, load_input, require_depot,
    tighten_expiration,
};
use crate::store::{LedgerStore, LedgerTx};

/// Delivery document registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRemittance {
    pub document_number: String,
    pub date: NaiveDate,
    pub supplier: Supplier,
    pub depot_id: DepotId,
    pub items: Vec<NewRemittanceLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRemittanceLine {
    pub description: String,
    pub unit: String,
    pub category: InputCategory,
    pub quantity_ordered: Decimal,
    /// Input already known to hold this product at the depot of entry.
    pub input_id: Option<InputId>,
    pub batch: Option<BatchInfo>,
}

/// A received line that cannot be booked until an input exists for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInputCreation {
    pub remittance_id: RemittanceId,
    pub document_number: String,
    pub item_id: RemittanceItemId,
    pub description: String,
    pub unit: String,
    pub category: InputCategory,
    pub pending_quantity: Decimal,
}

impl PendingInputCreation {
    fn from_item(remittance: &Remittance, item: &RemittanceItem) -> Self {
        Self {
            remittance_id: remittance.id_typed(),
            document_number: remittance.document_number().to_string(),
            item_id: item.id,
            description: item.description.clone(),
            unit: item.unit.clone(),
            category: item.category,
            pending_quantity: item.pending_quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveOutcome {
    pub remittance: Remittance,
    pub pending_input_creation: Vec<PendingInputCreation>,
    /// Entry movements booked by this call, in item order.
    pub movements: Vec<Movement>,
}

/// Values that replace the line's own data when creating an input from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOverrides {
    pub name: Option<String>,
    pub expires_on: Option<NaiveDate>,
    pub minimum_stock: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInput {
    pub input: Input,
    /// Entry booked for the quantity that was waiting on the line.
    pub movement: Option<Movement>,
}

#[derive(Debug)]
pub struct ReceptionEngine<S, B> {
    store: S,
    bus: B,
}

impl<S, B> ReceptionEngine<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> ReceptionEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn create_remittance(
        &self,
        firm_id: FirmId,
        new: NewRemittance,
    ) -> Result<Remittance, LedgerError> {
        let mut outbox = Outbox::new();
        let result = self.store.transaction(|tx| {
            create_remittance_in(tx, &mut outbox, firm_id, &new, Utc::now())
        });

        let remittance = match result {
            Ok(remittance) => remittance,
            Err(e) => {
                debug!(
                    firm = %firm_id,
                    document = %new.document_number,
                    supplier = %new.supplier,
                    error = %e,
                    "remittance rejected"
                );
                return Err(e);
            }
        };
        info!(
            firm = %firm_id,
            remittance_id = %remittance.id_typed(),
            document = %remittance.document_number(),
            supplier = %new.supplier,
            items = remittance.items().len(),
            "remittance registered"
        );
        outbox.publish(&self.bus)?;
        Ok(remittance)
    }

    /// Reconcile cumulative received quantities against the document.
    ///
    /// Sending the same quantities again books nothing and keeps the status.
    pub fn receive(
        &self,
        firm_id: FirmId,
        remittance_id: RemittanceId,
        received_by: UserId,
        updates: Vec<ItemReceipt>,
    ) -> Result<ReceiveOutcome, LedgerError> {
        let (outcome, outbox) = retry_once("receive", || {
            let mut outbox = Outbox::new();
            let outcome = self.store.transaction(|tx| {
                receive_in(
                    tx,
                    &mut outbox,
                    firm_id,
                    remittance_id,
                    received_by,
                    &updates,
                    Utc::now(),
                )
            })?;
            Ok((outcome, outbox))
        })?;

        info!(
            firm = %firm_id,
            remittance_id = %remittance_id,
            document = %outcome.remittance.document_number(),
            status = outcome.remittance.status().as_str(),
            booked = outcome.movements.len(),
            deferred = outcome.pending_input_creation.len(),
            "receipt reconciled"
        );
        outbox.publish(&self.bus)?;
        Ok(outcome)
    }

    /// Link an existing input to a line; books any quantity held on the line.
    pub fn link_input_to_item(
        &self,
        firm_id: FirmId,
        item_id: RemittanceItemId,
        input_id: InputId,
    ) -> Result<Option<Movement>, LedgerError> {
        let (movement, outbox) = retry_once("link_input_to_item", || {
            let mut outbox = Outbox::new();
            let movement = self.store.transaction(|tx| {
                let input = load_input(tx, firm_id, input_id)?;
                let at = Utc::now();
                let remittance = remittance_of_item(tx, firm_id, item_id)?;
                link_in(tx, &mut outbox, firm_id, remittance, item_id, &input, at)
            })?;
            Ok((movement, outbox))
        })?;

        info!(
            firm = %firm_id,
            item_id = %item_id,
            input_id = %input_id,
            released = ?movement.as_ref().map(|m| m.quantity),
            "input linked to remittance item"
        );
        outbox.publish(&self.bus)?;
        Ok(movement)
    }

    /// Create an input from the line's own data and link it in one transaction.
    pub fn create_input_for_item(
        &self,
        firm_id: FirmId,
        item_id: RemittanceItemId,
        overrides: InputOverrides,
    ) -> Result<ItemInput, LedgerError> {
        let (created, outbox) = retry_once("create_input_for_item", || {
            let mut outbox = Outbox::new();
            let created = self.store.transaction(|tx| {
                let at = Utc::now();
                let remittance = remittance_of_item(tx, firm_id, item_id)?;
                let depot_id = remittance_depot(&remittance)?;
                let item = remittance
                    .item(item_id)
                    .ok_or_else(|| LedgerError::NotFound(format!("remittance item {item_id}")))?;
                if let Some(current) = item.link.input_id() {
                    return Err(LedgerError::InvalidTransition(format!(
                        "item '{}' is already linked to input {current}",
                        item.description
                    )));
                }

                let new = NewInput {
                    name: overrides
                        .name
                        .clone()
                        .unwrap_or_else(|| item.description.clone()),
                    unit: item.unit.clone(),
                    category: item.category,
                    depot_id,
                    expires_on: overrides
                        .expires_on
                        .or_else(|| item.batch.as_ref().and_then(|b| b.expires_on)),
                    minimum_stock: overrides.minimum_stock,
                };
                let input = create_input_in(tx, &mut outbox, firm_id, &new, at)?;
                let movement = link_in(tx, &mut outbox, firm_id, remittance, item_id, &input, at)?;
                let input = load_input(tx, firm_id, input.id_typed())?;
                Ok::<_, LedgerError>(ItemInput { input, movement })
            })?;
            Ok((created, outbox))
        })?;

        info!(
            firm = %firm_id,
            item_id = %item_id,
            input_id = %created.input.id_typed(),
            name = %created.input.name(),
            "input created for remittance item"
        );
        outbox.publish(&self.bus)?;
        Ok(created)
    }

    pub fn cancel_remittance(
        &self,
        firm_id: FirmId,
        remittance_id: RemittanceId,
        reason: &str,
        cancelled_by: Option<UserId>,
    ) -> Result<Remittance, LedgerError> {
        let (remittance, outbox) = retry_once("cancel_remittance", || {
            let mut outbox = Outbox::new();
            let remittance = self.store.transaction(|tx| {
                let mut remittance = load_remittance(tx, firm_id, remittance_id)?;
                let expected = ExpectedVersion::Exact(remittance.version());
                execute(
                    &mut remittance,
                    &RemittanceCommand::CancelRemittance(CancelRemittance {
                        firm_id,
                        remittance_id,
                        reason: reason.to_string(),
                        cancelled_by,
                        occurred_at: Utc::now(),
                    }),
                    remittance_id.aggregate_id(),
                    REMITTANCE_AGGREGATE,
                    &mut outbox,
                )?;
                tx.save_remittance(&remittance, expected)?;
                Ok::<_, LedgerError>(remittance)
            })?;
            Ok((remittance, outbox))
        })?;

        info!(
            firm = %firm_id,
            remittance_id = %remittance_id,
            document = %remittance.document_number(),
            reason = %reason.trim(),
            "remittance cancelled"
        );
        outbox.publish(&self.bus)?;
        Ok(remittance)
    }

    /// Lines of active remittances holding received quantity without an input.
    pub fn items_needing_input(
        &self,
        firm_id: FirmId,
    ) -> Result<Vec<PendingInputCreation>, LedgerError> {
        self.store.transaction(|tx| {
            let remittances = tx.remittances(firm_id)?;
            Ok(remittances
                .iter()
                .filter(|r| r.status() != RemittanceStatus::Cancelled)
                .flat_map(|r| {
                    r.items_needing_input()
                        .into_iter()
                        .map(move |item| PendingInputCreation::from_item(r, item))
                })
                .collect())
        })
    }

    pub fn remittance(
        &self,
        firm_id: FirmId,
        remittance_id: RemittanceId,
    ) -> Result<Remittance, LedgerError> {
        self.store
            .transaction(|tx| load_remittance(tx, firm_id, remittance_id))
    }

    pub fn remittances(&self, firm_id: FirmId) -> Result<Vec<Remittance>, LedgerError> {
        self.store.transaction(|tx| Ok(tx.remittances(firm_id)?))
    }
}

fn retry_once<R>(
    operation: &'static str,
    mut attempt: impl FnMut() -> Result<R, LedgerError>,
) -> Result<R, LedgerError> {
    match attempt() {
        Err(LedgerError::ConcurrencyConflict(detail)) => {
            warn!(operation, detail = %detail, "concurrency conflict; retrying once");
            attempt()
        }
        other => other,
    }
}

fn load_remittance(
    tx: &dyn LedgerTx,
    firm_id: FirmId,
    remittance_id: RemittanceId,
) -> Result<Remittance, LedgerError> {
    tx.remittance(firm_id, remittance_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("remittance {remittance_id}")))
}

fn remittance_of_item(
    tx: &dyn LedgerTx,
    firm_id: FirmId,
    item_id: RemittanceItemId,
) -> Result<Remittance, LedgerError> {
    tx.remittance_by_item(firm_id, item_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("remittance item {item_id}")))
}

fn remittance_depot(remittance: &Remittance) -> Result<DepotId, LedgerError> {
    remittance.depot_id().ok_or_else(|| {
        LedgerError::Store(StoreError::MissingRecord(format!(
            "depot of remittance {}",
            remittance.id_typed()
        )))
    })
}

fn duplicate_document(key: &DocumentKey, supplier: &Supplier) -> LedgerError {
    LedgerError::DuplicateDocument {
        document_number: key.document_number.clone(),
        date: key.date,
        supplier: supplier.to_string(),
    }
}

fn receipt_reference(remittance: &Remittance) -> String {
    format!("receipt {}", remittance.document_number())
}

fn create_remittance_in(
    tx: &mut dyn LedgerTx,
    outbox: &mut Outbox,
    firm_id: FirmId,
    new: &NewRemittance,
    at: DateTime<Utc>,
) -> Result<Remittance, LedgerError> {
    require_depot(tx, firm_id, new.depot_id)?;

    let mut items = Vec::with_capacity(new.items.len());
    for line in &new.items {
        if let Some(input_id) = line.input_id {
            let input = load_input(tx, firm_id, input_id)?;
            if input.depot_id() != Some(new.depot_id) {
                return Err(LedgerError::Validation(format!(
                    "input {input_id} is not held at the depot of entry {}",
                    new.depot_id
                )));
            }
        }
        items.push(NewRemittanceItem {
            item_id: RemittanceItemId::generate(),
            description: line.description.clone(),
            unit: line.unit.clone(),
            category: line.category,
            quantity_ordered: Quantity::new(line.quantity_ordered)?,
            input_id: line.input_id,
            batch: line.batch.clone(),
        });
    }

    let key = DocumentKey::new(firm_id, &new.document_number, new.date, &new.supplier);
    if tx.active_remittance(&key)?.is_some() {
        return Err(duplicate_document(&key, &new.supplier));
    }

    let remittance_id = RemittanceId::generate();
    let mut remittance = Remittance::empty(remittance_id);
    execute(
        &mut remittance,
        &RemittanceCommand::CreateRemittance(CreateRemittance {
            firm_id,
            remittance_id,
            document_number: new.document_number.clone(),
            date: new.date,
            supplier: new.supplier.clone(),
            depot_id: new.depot_id,
            items,
            occurred_at: at,
        }),
        remittance_id.aggregate_id(),
        REMITTANCE_AGGREGATE,
        outbox,
    )?;

    tx.save_remittance(&remittance, ExpectedVersion::New)
        .map_err(|e| {
            if e.is_unique_violation(ACTIVE_DOCUMENT_CONSTRAINT) {
                duplicate_document(&key, &new.supplier)
            } else {
                LedgerError::from(e)
            }
        })?;
    Ok(remittance)
}

fn receive_in(
    tx: &mut dyn LedgerTx,
    outbox: &mut Outbox,
    firm_id: FirmId,
    remittance_id: RemittanceId,
    received_by: UserId,
    updates: &[ItemReceipt],
    at: DateTime<Utc>,
) -> Result<ReceiveOutcome, LedgerError> {
    let mut remittance = load_remittance(tx, firm_id, remittance_id)?;

    if !remittance.status().is_terminal() {
        if let (Some(key), Some(supplier)) = (remittance.document_key(), remittance.supplier()) {
            if let Some(holder) = tx.active_remittance(&key)? {
                if holder != remittance_id {
                    return Err(duplicate_document(&key, supplier));
                }
            }
        }
    }

    let expected = ExpectedVersion::Exact(remittance.version());
    let events = execute(
        &mut remittance,
        &RemittanceCommand::RecordReceipt(RecordReceipt {
            firm_id,
            remittance_id,
            received_by,
            updates: updates.to_vec(),
            occurred_at: at,
        }),
        remittance_id.aggregate_id(),
        REMITTANCE_AGGREGATE,
        outbox,
    )?;

    if events.is_empty() {
        return Ok(ReceiveOutcome {
            remittance,
            pending_input_creation: Vec::new(),
            movements: Vec::new(),
        });
    }
    tx.save_remittance(&remittance, expected)?;

    let depot_id = remittance_depot(&remittance)?;
    let reference = receipt_reference(&remittance);
    let mut movements = Vec::new();
    let mut deferred = Vec::new();

    for event in &events {
        let RemittanceEvent::ItemsReceived(received) = event else {
            continue;
        };
        for line in &received.lines {
            match line.disposition {
                DeltaDisposition::Book { input_id } => {
                    let booked = book_movement(
                        tx,
                        outbox,
                        firm_id,
                        &MovementRequest {
                            input_id,
                            kind: MovementKind::Entry,
                            quantity: line.delta,
                            depot_id,
                            reference: reference.clone(),
                            remittance_id: Some(remittance_id.aggregate_id()),
                            registered_by: Some(received_by),
                        },
                        at,
                    )?;
                    movements.extend(booked);

                    if let Some(expires_on) = line.batch.as_ref().and_then(|b| b.expires_on) {
                        tighten_expiration(tx, outbox, firm_id, input_id, expires_on, at)?;
                    }
                }
                DeltaDisposition::Defer => deferred.push(line.item_id),
            }
        }
    }

    let pending_input_creation = deferred
        .iter()
        .filter_map(|item_id| remittance.item(*item_id))
        .map(|item| PendingInputCreation::from_item(&remittance, item))
        .collect();

    Ok(ReceiveOutcome {
        remittance,
        pending_input_creation,
        movements,
    })
}

/// Link `input` to a line of `remittance` and book the quantity held on it.
fn link_in(
    tx: &mut dyn LedgerTx,
    outbox: &mut Outbox,
    firm_id: FirmId,
    mut remittance: Remittance,
    item_id: RemittanceItemId,
    input: &Input,
    at: DateTime<Utc>,
) -> Result<Option<Movement>, LedgerError> {
    let input_id = input.id_typed();
    let input_depot_id = input.depot_id().ok_or_else(|| {
        LedgerError::Store(StoreError::MissingRecord(format!("depot of input {input_id}")))
    })?;

    let remittance_id = remittance.id_typed();
    let expected = ExpectedVersion::Exact(remittance.version());
    let events = execute(
        &mut remittance,
        &RemittanceCommand::LinkInput(LinkInput {
            firm_id,
            remittance_id,
            item_id,
            input_id,
            input_depot_id,
            occurred_at: at,
        }),
        remittance_id.aggregate_id(),
        REMITTANCE_AGGREGATE,
        outbox,
    )?;
    let Some(released) = events.iter().find_map(|e| match e {
        RemittanceEvent::InputLinked(linked) => Some(linked.released),
        _ => None,
    }) else {
        return Ok(None);
    };
    tx.save_remittance(&remittance, expected)?;

    let batch_expiry = remittance
        .item(item_id)
        .and_then(|item| item.batch.as_ref())
        .and_then(|b| b.expires_on);
    if let Some(expires_on) = batch_expiry {
        tighten_expiration(tx, outbox, firm_id, input_id, expires_on, at)?;
    }

    if released <= Decimal::ZERO {
        return Ok(None);
    }
    let mut booked = book_movement(
        tx,
        outbox,
        firm_id,
        &MovementRequest {
            input_id,
            kind: MovementKind::Entry,
            quantity: released,
            depot_id: input_depot_id,
            reference: receipt_reference(&remittance),
            remittance_id: Some(remittance_id.aggregate_id()),
            registered_by: None,
        },
        at,
    )?;
    Ok(booked.pop())
}
