//! Stock ledger engine.
//!
//! Appends movements and keeps each input's denormalized balance in step with
//! its movement log. Every operation runs in one store transaction:
//!
//! ```text
//! request
//!   ↓
//! 1. Load input + depot (firm-scoped)
//!   ↓
//! 2. Decide (Input aggregate: sign, depot match, non-negative balance)
//!   ↓
//! 3. Save input (expected version) + append movement(s)
//!   ↓
//! 4. Commit, then publish the recorded events
//! ```
//!
//! Transfers debit the source input and credit the input with the same
//! product identity at the destination, creating it when missing, inside the
//! same transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use agroledger_core::{
    AggregateId, AggregateRoot, ExpectedVersion, FirmId, Quantity, UserId,
};
use agroledger_events::{EventBus, EventEnvelope};
use agroledger_inventory::{
    AcceptTransfer, CreateInput, Depot, DepotId, Input, InputCategory, InputCommand, InputEvent,
    InputId, Movement, MovementId, MovementKind, RegisterMovement, UpdateThresholds,
    signed_balance,
};

use crate::error::{LedgerError, PRIMARY_KEY_CONSTRAINT, StoreError};
use crate::publish::{INPUT_AGGREGATE, Outbox, execute};
use crate::store::{LedgerStore, LedgerTx};

/// Movement registration request.
///
/// `quantity` is the magnitude; the sign follows from `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub input_id: InputId,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub depot_id: DepotId,
    pub reference: String,
    pub remittance_id: Option<AggregateId>,
    pub registered_by: Option<UserId>,
}

/// Manual input creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInput {
    pub name: String,
    pub unit: String,
    pub category: InputCategory,
    pub depot_id: DepotId,
    pub expires_on: Option<NaiveDate>,
    pub minimum_stock: Option<Decimal>,
}

/// Stored balance compared with the signed sum of the movement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub input_id: InputId,
    pub stored: Decimal,
    pub computed: Decimal,
}

impl BalanceCheck {
    pub fn drift(&self) -> Decimal {
        self.stored - self.computed
    }

    pub fn is_consistent(&self) -> bool {
        self.stored == self.computed
    }
}

#[derive(Debug)]
pub struct StockLedger<S, B> {
    store: S,
    bus: B,
}

impl<S, B> StockLedger<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> StockLedger<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Register a plot flagged as depot as a storage location.
    pub fn register_depot(
        &self,
        firm_id: FirmId,
        depot_id: DepotId,
        name: &str,
        is_depot: bool,
    ) -> Result<Depot, LedgerError> {
        let depot = Depot::from_plot(depot_id, firm_id, name, is_depot, Utc::now())?;
        self.store.transaction(|tx| {
            tx.insert_depot(depot.clone()).map_err(|e| match e {
                e if e.is_unique_violation(PRIMARY_KEY_CONSTRAINT) => {
                    LedgerError::Validation(format!("depot {depot_id} is already registered"))
                }
                other => LedgerError::from(other),
            })
        })?;
        info!(firm = %firm_id, depot_id = %depot_id, name = %depot.name, "depot registered");
        Ok(depot)
    }

    pub fn depots(&self, firm_id: FirmId) -> Result<Vec<Depot>, LedgerError> {
        self.store.transaction(|tx| Ok(tx.depots(firm_id)?))
    }

    /// Create an input with a zero opening balance.
    pub fn create_input(&self, firm_id: FirmId, new: NewInput) -> Result<Input, LedgerError> {
        let mut outbox = Outbox::new();
        let input = self
            .store
            .transaction(|tx| create_input_in(tx, &mut outbox, firm_id, &new, Utc::now()))?;
        info!(
            firm = %firm_id,
            input_id = %input.id_typed(),
            name = %input.name(),
            depot_id = %new.depot_id,
            "input created"
        );
        outbox.publish(&self.bus)?;
        Ok(input)
    }

    /// Change the minimum stock / expiration date. Never touches the balance.
    pub fn update_thresholds(
        &self,
        firm_id: FirmId,
        input_id: InputId,
        minimum_stock: Option<Decimal>,
        expires_on: Option<NaiveDate>,
    ) -> Result<Input, LedgerError> {
        let mut outbox = Outbox::new();
        let input = self.store.transaction(|tx| {
            let mut input = load_input(tx, firm_id, input_id)?;
            let expected = ExpectedVersion::Exact(input.version());
            let events = execute(
                &mut input,
                &InputCommand::UpdateThresholds(UpdateThresholds {
                    firm_id,
                    input_id,
                    minimum_stock,
                    expires_on,
                    occurred_at: Utc::now(),
                }),
                input_id.aggregate_id(),
                INPUT_AGGREGATE,
                &mut outbox,
            )?;
            if !events.is_empty() {
                tx.save_input(&input, expected)?;
            }
            Ok::<_, LedgerError>(input)
        })?;
        outbox.publish(&self.bus)?;
        Ok(input)
    }

    /// Append a movement (two for transfers) and update the balance(s).
    ///
    /// Returns the movement booked on `request.input_id`; for transfers that
    /// is the debit at the source depot.
    pub fn register_movement(
        &self,
        firm_id: FirmId,
        request: MovementRequest,
    ) -> Result<Movement, LedgerError> {
        let mut outbox = Outbox::new();
        let result = self
            .store
            .transaction(|tx| book_movement(tx, &mut outbox, firm_id, &request, Utc::now()));

        let mut booked = match result {
            Ok(booked) => booked,
            Err(e) => {
                debug!(
                    firm = %firm_id,
                    input_id = %request.input_id,
                    kind = request.kind.movement_type().as_str(),
                    quantity = %request.quantity,
                    error = %e,
                    "movement rejected"
                );
                return Err(e);
            }
        };
        outbox.publish(&self.bus)?;

        let movement = booked.swap_remove(0);
        Ok(movement)
    }

    /// Current balance of an input (signed sum of its movements).
    pub fn current_stock(
        &self,
        firm_id: FirmId,
        input_id: InputId,
    ) -> Result<Decimal, LedgerError> {
        self.store
            .transaction(|tx| Ok(load_input(tx, firm_id, input_id)?.balance()))
    }

    pub fn input(&self, firm_id: FirmId, input_id: InputId) -> Result<Input, LedgerError> {
        self.store.transaction(|tx| load_input(tx, firm_id, input_id))
    }

    /// Recompute the balance from the movement log and compare it with the stored one.
    pub fn verify_balance(
        &self,
        firm_id: FirmId,
        input_id: InputId,
    ) -> Result<BalanceCheck, LedgerError> {
        self.store.transaction(|tx| {
            let input = load_input(tx, firm_id, input_id)?;
            let movements = tx.movements(firm_id, input_id)?;
            let computed = signed_balance(&movements).ok_or_else(|| {
                LedgerError::Validation(format!(
                    "movement log of input {input_id} sums beyond the decimal range"
                ))
            })?;
            Ok(BalanceCheck {
                input_id,
                stored: input.balance(),
                computed,
            })
        })
    }

    /// Movement log of an input, in registration order.
    pub fn movements(
        &self,
        firm_id: FirmId,
        input_id: InputId,
    ) -> Result<Vec<Movement>, LedgerError> {
        self.store.transaction(|tx| {
            load_input(tx, firm_id, input_id)?;
            Ok(tx.movements(firm_id, input_id)?)
        })
    }

    /// Inputs held at a depot with their balances.
    pub fn stock_by_depot(
        &self,
        firm_id: FirmId,
        depot_id: DepotId,
    ) -> Result<Vec<Input>, LedgerError> {
        self.store.transaction(|tx| {
            require_depot(tx, firm_id, depot_id)?;
            Ok(tx.inputs_at_depot(firm_id, depot_id)?)
        })
    }
}

pub(crate) fn load_input(
    tx: &dyn LedgerTx,
    firm_id: FirmId,
    input_id: InputId,
) -> Result<Input, LedgerError> {
    tx.input(firm_id, input_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("input {input_id}")))
}

pub(crate) fn require_depot(
    tx: &dyn LedgerTx,
    firm_id: FirmId,
    depot_id: DepotId,
) -> Result<Depot, LedgerError> {
    tx.depot(firm_id, depot_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("depot {depot_id}")))
}

pub(crate) fn create_input_in(
    tx: &mut dyn LedgerTx,
    outbox: &mut Outbox,
    firm_id: FirmId,
    new: &NewInput,
    at: DateTime<Utc>,
) -> Result<Input, LedgerError> {
    require_depot(tx, firm_id, new.depot_id)?;

    let input_id = InputId::generate();
    let mut input = Input::empty(input_id);
    execute(
        &mut input,
        &InputCommand::CreateInput(CreateInput {
            firm_id,
            input_id,
            name: new.name.clone(),
            unit: new.unit.clone(),
            category: new.category,
            depot_id: new.depot_id,
            expires_on: new.expires_on,
            minimum_stock: new.minimum_stock,
            occurred_at: at,
        }),
        input_id.aggregate_id(),
        INPUT_AGGREGATE,
        outbox,
    )?;
    tx.save_input(&input, ExpectedVersion::New)?;
    Ok(input)
}

/// Move an input's expiration date earlier when a batch expires sooner.
pub(crate) fn tighten_expiration(
    tx: &mut dyn LedgerTx,
    outbox: &mut Outbox,
    firm_id: FirmId,
    input_id: InputId,
    batch_expires_on: NaiveDate,
    at: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let mut input = load_input(tx, firm_id, input_id)?;
    if input.expires_on().is_some_and(|current| current <= batch_expires_on) {
        return Ok(());
    }
    let expected = ExpectedVersion::Exact(input.version());
    let minimum_stock = input.minimum_stock();
    execute(
        &mut input,
        &InputCommand::UpdateThresholds(UpdateThresholds {
            firm_id,
            input_id,
            minimum_stock,
            expires_on: Some(batch_expires_on),
            occurred_at: at,
        }),
        input_id.aggregate_id(),
        INPUT_AGGREGATE,
        outbox,
    )?;
    tx.save_input(&input, expected)?;
    debug!(
        firm = %firm_id,
        input_id = %input_id,
        expires_on = %batch_expires_on,
        "input expiration tightened from batch"
    );
    Ok(())
}

fn registered_movement(events: &[InputEvent]) -> Result<Movement, StoreError> {
    events
        .iter()
        .find_map(|e| match e {
            InputEvent::MovementRegistered(m) => Some(m.movement.clone()),
            _ => None,
        })
        .ok_or_else(|| StoreError::MissingRecord("movement event".to_string()))
}

/// Book one movement request inside an open transaction.
///
/// Returns the booked movements: one, or debit then credit for transfers.
pub(crate) fn book_movement(
    tx: &mut dyn LedgerTx,
    outbox: &mut Outbox,
    firm_id: FirmId,
    request: &MovementRequest,
    at: DateTime<Utc>,
) -> Result<Vec<Movement>, LedgerError> {
    let quantity = Quantity::new(request.quantity)?;
    let mut source = load_input(tx, firm_id, request.input_id)?;
    require_depot(tx, firm_id, request.depot_id)?;

    let expected = ExpectedVersion::Exact(source.version());
    let events = execute(
        &mut source,
        &InputCommand::RegisterMovement(RegisterMovement {
            firm_id,
            input_id: request.input_id,
            movement_id: MovementId::generate(),
            kind: request.kind,
            quantity,
            depot_id: request.depot_id,
            reference: request.reference.clone(),
            remittance_id: request.remittance_id,
            registered_by: request.registered_by,
            occurred_at: at,
        }),
        request.input_id.aggregate_id(),
        INPUT_AGGREGATE,
        outbox,
    )?;
    let debit = registered_movement(&events)?;
    tx.save_input(&source, expected)?;
    tx.append_movement(debit.clone())?;

    info!(
        firm = %firm_id,
        input_id = %request.input_id,
        movement_type = debit.movement_type.as_str(),
        quantity = %debit.quantity,
        balance = %source.balance(),
        reference = %debit.reference,
        "movement registered"
    );

    let MovementKind::Transfer { destination } = request.kind else {
        return Ok(vec![debit]);
    };

    require_depot(tx, firm_id, destination)?;
    let identity = source.identity();
    let existing = tx
        .inputs_at_depot(firm_id, destination)?
        .into_iter()
        .find(|i| i.identity() == identity);

    let (mut target, expected) = match existing {
        Some(input) => {
            let version = input.version();
            (input, ExpectedVersion::Exact(version))
        }
        None => {
            let input_id = InputId::generate();
            let mut input = Input::empty(input_id);
            execute(
                &mut input,
                &InputCommand::CreateInput(CreateInput::mirror_of(
                    &source,
                    firm_id,
                    input_id,
                    destination,
                    at,
                )),
                input_id.aggregate_id(),
                INPUT_AGGREGATE,
                outbox,
            )?;
            info!(
                firm = %firm_id,
                input_id = %input_id,
                depot_id = %destination,
                name = %source.name(),
                "input created at transfer destination"
            );
            (input, ExpectedVersion::New)
        }
    };

    let target_id = target.id_typed();
    let events = execute(
        &mut target,
        &InputCommand::AcceptTransfer(AcceptTransfer {
            firm_id,
            input_id: target_id,
            movement_id: MovementId::generate(),
            source_depot_id: request.depot_id,
            quantity,
            reference: request.reference.clone(),
            registered_by: request.registered_by,
            occurred_at: at,
        }),
        target_id.aggregate_id(),
        INPUT_AGGREGATE,
        outbox,
    )?;
    let credit = registered_movement(&events)?;
    tx.save_input(&target, expected)?;
    tx.append_movement(credit.clone())?;

    Ok(vec![debit, credit])
}
