use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agroledger_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, FirmId, Quantity, UserId,
    aggregate_id_newtype,
};
use agroledger_events::Event;

use crate::depot::DepotId;
use crate::movement::{Movement, MovementId, MovementKind, MovementType};

aggregate_id_newtype!(
    /// Input identifier (firm-scoped via `firm_id` fields in events/commands).
    InputId
);

/// Broad classification of consumable inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputCategory {
    Fertilizer,
    Seed,
    Agrochemical,
    Feed,
    Fuel,
    Veterinary,
    Other,
}

/// Product identity used to match the same input across depots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub name: String,
    pub unit: String,
    pub category: InputCategory,
}

impl ProductIdentity {
    pub fn new(name: &str, unit: &str, category: InputCategory) -> Self {
        Self {
            name: normalize(name),
            unit: normalize(unit),
            category,
        }
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Aggregate root: Input (a stock-keeping unit held at one depot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    id: InputId,
    firm_id: Option<FirmId>,
    name: String,
    unit: String,
    category: InputCategory,
    depot_id: Option<DepotId>,
    expires_on: Option<NaiveDate>,
    minimum_stock: Option<Decimal>,
    balance: Decimal,
    last_movement_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Input {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InputId) -> Self {
        Self {
            id,
            firm_id: None,
            name: String::new(),
            unit: String::new(),
            category: InputCategory::Other,
            depot_id: None,
            expires_on: None,
            minimum_stock: None,
            balance: Decimal::ZERO,
            last_movement_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InputId {
        self.id
    }

    pub fn firm_id(&self) -> Option<FirmId> {
        self.firm_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn category(&self) -> InputCategory {
        self.category
    }

    pub fn depot_id(&self) -> Option<DepotId> {
        self.depot_id
    }

    pub fn expires_on(&self) -> Option<NaiveDate> {
        self.expires_on
    }

    pub fn minimum_stock(&self) -> Option<Decimal> {
        self.minimum_stock
    }

    /// Denormalized balance: the signed sum of every applied movement.
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn identity(&self) -> ProductIdentity {
        ProductIdentity::new(&self.name, &self.unit, self.category)
    }
}

impl AggregateRoot for Input {
    type Id = InputId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInput.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInput {
    pub firm_id: FirmId,
    pub input_id: InputId,
    pub name: String,
    pub unit: String,
    pub category: InputCategory,
    pub depot_id: DepotId,
    pub expires_on: Option<NaiveDate>,
    pub minimum_stock: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

impl CreateInput {
    /// Command creating the same product at another depot with a zero balance.
    pub fn mirror_of(
        source: &Input,
        firm_id: FirmId,
        input_id: InputId,
        depot_id: DepotId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            firm_id,
            input_id,
            name: source.name.clone(),
            unit: source.unit.clone(),
            category: source.category,
            depot_id,
            expires_on: source.expires_on,
            minimum_stock: source.minimum_stock,
            occurred_at,
        }
    }
}

/// Command: RegisterMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMovement {
    pub firm_id: FirmId,
    pub input_id: InputId,
    pub movement_id: MovementId,
    pub kind: MovementKind,
    pub quantity: Quantity,
    pub depot_id: DepotId,
    pub reference: String,
    pub remittance_id: Option<AggregateId>,
    pub registered_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptTransfer (credit leg of a transfer, on the destination input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptTransfer {
    pub firm_id: FirmId,
    pub input_id: InputId,
    pub movement_id: MovementId,
    pub source_depot_id: DepotId,
    pub quantity: Quantity,
    pub reference: String,
    pub registered_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateThresholds (alerting metadata; never touches the balance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateThresholds {
    pub firm_id: FirmId,
    pub input_id: InputId,
    pub minimum_stock: Option<Decimal>,
    pub expires_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputCommand {
    CreateInput(CreateInput),
    RegisterMovement(RegisterMovement),
    AcceptTransfer(AcceptTransfer),
    UpdateThresholds(UpdateThresholds),
}

/// Event: InputCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCreated {
    pub firm_id: FirmId,
    pub input_id: InputId,
    pub name: String,
    pub unit: String,
    pub category: InputCategory,
    pub depot_id: DepotId,
    pub expires_on: Option<NaiveDate>,
    pub minimum_stock: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRegistered {
    pub movement: Movement,
    pub balance_after: Decimal,
}

/// Event: ThresholdsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsUpdated {
    pub firm_id: FirmId,
    pub input_id: InputId,
    pub minimum_stock: Option<Decimal>,
    pub expires_on: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    InputCreated(InputCreated),
    MovementRegistered(MovementRegistered),
    ThresholdsUpdated(ThresholdsUpdated),
}

impl Event for InputEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InputEvent::InputCreated(_) => "inventory.input.created",
            InputEvent::MovementRegistered(_) => "inventory.movement.registered",
            InputEvent::ThresholdsUpdated(_) => "inventory.input.thresholds_updated",
        }
    }

    fn firm_id(&self) -> FirmId {
        match self {
            InputEvent::InputCreated(e) => e.firm_id,
            InputEvent::MovementRegistered(e) => e.movement.firm_id,
            InputEvent::ThresholdsUpdated(e) => e.firm_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InputEvent::InputCreated(e) => e.occurred_at,
            InputEvent::MovementRegistered(e) => e.movement.occurred_at,
            InputEvent::ThresholdsUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Input {
    type Command = InputCommand;
    type Event = InputEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InputEvent::InputCreated(e) => {
                self.id = e.input_id;
                self.firm_id = Some(e.firm_id);
                self.name = e.name.clone();
                self.unit = e.unit.clone();
                self.category = e.category;
                self.depot_id = Some(e.depot_id);
                self.expires_on = e.expires_on;
                self.minimum_stock = e.minimum_stock;
                self.balance = Decimal::ZERO;
                self.created = true;
            }
            InputEvent::MovementRegistered(e) => {
                self.balance = e.balance_after;
                self.last_movement_at = Some(e.movement.occurred_at);
            }
            InputEvent::ThresholdsUpdated(e) => {
                self.minimum_stock = e.minimum_stock;
                self.expires_on = e.expires_on;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InputCommand::CreateInput(cmd) => self.handle_create(cmd),
            InputCommand::RegisterMovement(cmd) => self.handle_register(cmd),
            InputCommand::AcceptTransfer(cmd) => self.handle_accept_transfer(cmd),
            InputCommand::UpdateThresholds(cmd) => self.handle_update_thresholds(cmd),
        }
    }
}

impl Input {
    fn ensure_firm(&self, firm_id: FirmId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.firm_id != Some(firm_id) {
            return Err(DomainError::invariant("firm mismatch"));
        }
        Ok(())
    }

    fn ensure_input_id(&self, input_id: InputId) -> Result<(), DomainError> {
        if self.id != input_id {
            return Err(DomainError::invariant("input_id mismatch"));
        }
        Ok(())
    }

    fn out_of_range(&self, requested: Decimal) -> DomainError {
        DomainError::validation(format!(
            "booking {requested} on input {} would exceed the representable balance (current {})",
            self.id, self.balance
        ))
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("input {}", self.id)));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInput) -> Result<Vec<InputEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!("input {} already exists", cmd.input_id)));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("unit of measure cannot be empty"));
        }
        if let Some(min) = cmd.minimum_stock {
            if min < Decimal::ZERO {
                return Err(DomainError::validation("minimum stock cannot be negative"));
            }
        }

        Ok(vec![InputEvent::InputCreated(InputCreated {
            firm_id: cmd.firm_id,
            input_id: cmd.input_id,
            name: cmd.name.trim().to_string(),
            unit: cmd.unit.trim().to_string(),
            category: cmd.category,
            depot_id: cmd.depot_id,
            expires_on: cmd.expires_on,
            minimum_stock: cmd.minimum_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register(&self, cmd: &RegisterMovement) -> Result<Vec<InputEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_firm(cmd.firm_id)?;
        self.ensure_input_id(cmd.input_id)?;

        let reference = cmd.reference.trim();
        if reference.is_empty() {
            return Err(DomainError::validation(
                "every movement requires a non-empty reference",
            ));
        }

        if self.depot_id != Some(cmd.depot_id) {
            return Err(DomainError::validation(format!(
                "input {} is not held at depot {}",
                self.id, cmd.depot_id
            )));
        }

        if let MovementKind::Transfer { destination } = cmd.kind {
            if destination == cmd.depot_id {
                return Err(DomainError::validation(
                    "transfer destination must differ from the source depot",
                ));
            }
        }

        let requested = cmd.quantity.value();
        let signed = if cmd.kind.is_decrease() { -requested } else { requested };

        let balance_after = self
            .balance
            .checked_add(signed)
            .ok_or_else(|| self.out_of_range(requested))?;
        if balance_after < Decimal::ZERO {
            return Err(DomainError::InsufficientStock {
                input_id: self.id.0,
                depot_id: cmd.depot_id.0,
                available: self.balance,
                requested,
            });
        }

        Ok(vec![InputEvent::MovementRegistered(MovementRegistered {
            movement: Movement {
                id: cmd.movement_id,
                firm_id: cmd.firm_id,
                input_id: cmd.input_id,
                movement_type: cmd.kind.movement_type(),
                quantity: signed,
                depot_id: cmd.depot_id,
                destination_depot_id: cmd.kind.destination(),
                reference: reference.to_string(),
                remittance_id: cmd.remittance_id,
                registered_by: cmd.registered_by,
                occurred_at: cmd.occurred_at,
            },
            balance_after,
        })])
    }

    fn handle_accept_transfer(
        &self,
        cmd: &AcceptTransfer,
    ) -> Result<Vec<InputEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_firm(cmd.firm_id)?;
        self.ensure_input_id(cmd.input_id)?;

        let reference = cmd.reference.trim();
        if reference.is_empty() {
            return Err(DomainError::validation(
                "every movement requires a non-empty reference",
            ));
        }

        let destination = self
            .depot_id
            .ok_or_else(|| DomainError::invariant("created input without depot"))?;
        if destination == cmd.source_depot_id {
            return Err(DomainError::validation(
                "transfer destination must differ from the source depot",
            ));
        }

        let quantity = cmd.quantity.value();
        let balance_after = self
            .balance
            .checked_add(quantity)
            .ok_or_else(|| self.out_of_range(quantity))?;
        Ok(vec![InputEvent::MovementRegistered(MovementRegistered {
            movement: Movement {
                id: cmd.movement_id,
                firm_id: cmd.firm_id,
                input_id: cmd.input_id,
                movement_type: MovementType::Transfer,
                quantity,
                depot_id: cmd.source_depot_id,
                destination_depot_id: Some(destination),
                reference: reference.to_string(),
                remittance_id: None,
                registered_by: cmd.registered_by,
                occurred_at: cmd.occurred_at,
            },
            balance_after,
        })])
    }

    fn handle_update_thresholds(
        &self,
        cmd: &UpdateThresholds,
    ) -> Result<Vec<InputEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_firm(cmd.firm_id)?;
        self.ensure_input_id(cmd.input_id)?;

        if let Some(min) = cmd.minimum_stock {
            if min < Decimal::ZERO {
                return Err(DomainError::validation("minimum stock cannot be negative"));
            }
        }
        if cmd.minimum_stock == self.minimum_stock && cmd.expires_on == self.expires_on {
            return Ok(vec![]);
        }

        Ok(vec![InputEvent::ThresholdsUpdated(ThresholdsUpdated {
            firm_id: cmd.firm_id,
            input_id: cmd.input_id,
            minimum_stock: cmd.minimum_stock,
            expires_on: cmd.expires_on,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{AdjustmentDirection, signed_balance};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_firm_id() -> FirmId {
        FirmId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn qty(v: Decimal) -> Quantity {
        Quantity::new(v).unwrap()
    }

    fn created_input(firm_id: FirmId, depot_id: DepotId) -> Input {
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
                occurred_at: test_time(),
            }))
            .unwrap();
        input
    }

    fn movement_cmd(input: &Input, kind: MovementKind, quantity: Decimal) -> InputCommand {
        InputCommand::RegisterMovement(RegisterMovement {
            firm_id: input.firm_id().unwrap(),
            input_id: input.id_typed(),
            movement_id: MovementId::generate(),
            kind,
            quantity: qty(quantity),
            depot_id: input.depot_id().unwrap(),
            reference: "field application lot 4".to_string(),
            remittance_id: None,
            registered_by: None,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_input_starts_with_zero_balance() {
        let input = created_input(test_firm_id(), DepotId::generate());
        assert_eq!(input.balance(), Decimal::ZERO);
        assert_eq!(input.version(), 1);
        assert_eq!(
            input.identity(),
            ProductIdentity::new(" UREA ", "KG", InputCategory::Fertilizer)
        );
    }

    #[test]
    fn create_rejects_blank_name() {
        let input_id = InputId::generate();
        let err = Input::empty(input_id)
            .handle(&InputCommand::CreateInput(CreateInput {
                firm_id: test_firm_id(),
                input_id,
                name: "   ".to_string(),
                unit: "kg".to_string(),
                category: InputCategory::Seed,
                depot_id: DepotId::generate(),
                expires_on: None,
                minimum_stock: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn entry_and_exit_move_the_balance_with_implied_sign() {
        let mut input = created_input(test_firm_id(), DepotId::generate());
        input.execute(&movement_cmd(&input, MovementKind::Entry, dec!(100))).unwrap();
        let events = input.execute(&movement_cmd(&input, MovementKind::Exit, dec!(30))).unwrap();

        match &events[0] {
            InputEvent::MovementRegistered(e) => {
                assert_eq!(e.movement.quantity, dec!(-30));
                assert_eq!(e.movement.movement_type, MovementType::Exit);
                assert_eq!(e.balance_after, dec!(70));
            }
            other => panic!("expected MovementRegistered, got {other:?}"),
        }
        assert_eq!(input.balance(), dec!(70));
    }

    #[test]
    fn exit_beyond_balance_is_insufficient_stock() {
        let mut input = created_input(test_firm_id(), DepotId::generate());
        input.execute(&movement_cmd(&input, MovementKind::Entry, dec!(100))).unwrap();

        let err = input
            .handle(&movement_cmd(&input, MovementKind::Exit, dec!(150)))
            .unwrap_err();
        match err {
            DomainError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, dec!(100));
                assert_eq!(requested, dec!(150));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(input.balance(), dec!(100));
    }

    #[test]
    fn decreasing_adjustment_is_checked_like_an_exit() {
        let mut input = created_input(test_firm_id(), DepotId::generate());
        input.execute(&movement_cmd(&input, MovementKind::Entry, dec!(5))).unwrap();

        let decrease = MovementKind::Adjustment {
            direction: AdjustmentDirection::Decrease,
        };
        assert!(input.handle(&movement_cmd(&input, decrease, dec!(5.5))).is_err());
        input.execute(&movement_cmd(&input, decrease, dec!(5))).unwrap();
        assert_eq!(input.balance(), Decimal::ZERO);

        let increase = MovementKind::Adjustment {
            direction: AdjustmentDirection::Increase,
        };
        input.execute(&movement_cmd(&input, increase, dec!(2.25))).unwrap();
        assert_eq!(input.balance(), dec!(2.25));
    }

    #[test]
    fn movement_requires_reference() {
        let input = created_input(test_firm_id(), DepotId::generate());
        let mut cmd = match movement_cmd(&input, MovementKind::Entry, dec!(1)) {
            InputCommand::RegisterMovement(cmd) => cmd,
            _ => unreachable!(),
        };
        cmd.reference = "  ".to_string();
        let err = input.handle(&InputCommand::RegisterMovement(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn movement_at_foreign_depot_is_rejected() {
        let input = created_input(test_firm_id(), DepotId::generate());
        let mut cmd = match movement_cmd(&input, MovementKind::Entry, dec!(1)) {
            InputCommand::RegisterMovement(cmd) => cmd,
            _ => unreachable!(),
        };
        cmd.depot_id = DepotId::generate();
        assert!(input.handle(&InputCommand::RegisterMovement(cmd)).is_err());
    }

    #[test]
    fn transfer_debits_source_and_records_destination() {
        let mut input = created_input(test_firm_id(), DepotId::generate());
        input.execute(&movement_cmd(&input, MovementKind::Entry, dec!(40))).unwrap();

        let destination = DepotId::generate();
        let events = input
            .execute(&movement_cmd(&input, MovementKind::Transfer { destination }, dec!(10)))
            .unwrap();
        match &events[0] {
            InputEvent::MovementRegistered(e) => {
                assert_eq!(e.movement.quantity, dec!(-10));
                assert_eq!(e.movement.destination_depot_id, Some(destination));
            }
            other => panic!("expected MovementRegistered, got {other:?}"),
        }
        assert_eq!(input.balance(), dec!(30));
    }

    #[test]
    fn transfer_to_same_depot_is_rejected() {
        let input = created_input(test_firm_id(), DepotId::generate());
        let destination = input.depot_id().unwrap();
        let err = input
            .handle(&movement_cmd(&input, MovementKind::Transfer { destination }, dec!(1)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn accept_transfer_credits_destination() {
        let firm_id = test_firm_id();
        let mut input = created_input(firm_id, DepotId::generate());
        let source = DepotId::generate();
        input
            .execute(&InputCommand::AcceptTransfer(AcceptTransfer {
                firm_id,
                input_id: input.id_typed(),
                movement_id: MovementId::generate(),
                source_depot_id: source,
                quantity: qty(dec!(10)),
                reference: "move to silo".to_string(),
                registered_by: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(input.balance(), dec!(10));
    }

    #[test]
    fn unchanged_thresholds_emit_nothing() {
        let firm_id = test_firm_id();
        let input = created_input(firm_id, DepotId::generate());
        let events = input
            .handle(&InputCommand::UpdateThresholds(UpdateThresholds {
                firm_id,
                input_id: input.id_typed(),
                minimum_stock: None,
                expires_on: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn other_firm_cannot_move_stock() {
        let input = created_input(test_firm_id(), DepotId::generate());
        let mut cmd = match movement_cmd(&input, MovementKind::Entry, dec!(1)) {
            InputCommand::RegisterMovement(cmd) => cmd,
            _ => unreachable!(),
        };
        cmd.firm_id = test_firm_id();
        let err = input.handle(&InputCommand::RegisterMovement(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    fn arb_kind() -> impl Strategy<Value = MovementKind> {
        prop_oneof![
            Just(MovementKind::Entry),
            Just(MovementKind::Exit),
            Just(MovementKind::Adjustment {
                direction: AdjustmentDirection::Increase
            }),
            Just(MovementKind::Adjustment {
                direction: AdjustmentDirection::Decrease
            }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of movements is attempted, the balance
        /// equals the signed sum of the accepted movements and never goes negative.
        #[test]
        fn balance_equals_signed_sum_of_accepted_movements(
            steps in prop::collection::vec((arb_kind(), 1i64..10_000i64), 1..40)
        ) {
            let mut input = created_input(test_firm_id(), DepotId::generate());
            let mut log: Vec<Movement> = Vec::new();

            for (kind, cents) in steps {
                let quantity = Decimal::new(cents, 2);
                match input.execute(&movement_cmd(&input, kind, quantity)) {
                    Ok(events) => {
                        for e in events {
                            if let InputEvent::MovementRegistered(e) = e {
                                log.push(e.movement);
                            }
                        }
                    }
                    Err(DomainError::InsufficientStock { .. }) => {
                        prop_assert!(kind.is_decrease());
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                }
                prop_assert!(input.balance() >= Decimal::ZERO);
                prop_assert_eq!(Some(input.balance()), signed_balance(&log));
            }
        }
    }
}
