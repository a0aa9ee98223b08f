use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agroledger_core::{
    Aggregate, AggregateRoot, DomainError, Entity, FirmId, Quantity, UserId,
    aggregate_id_newtype,
};
use agroledger_events::Event;
use agroledger_inventory::{DepotId, InputCategory, InputId};

aggregate_id_newtype!(
    /// Remittance (delivery document) identifier.
    RemittanceId
);

aggregate_id_newtype!(
    /// Remittance line identifier.
    RemittanceItemId
);

/// Remittance status lifecycle.
///
/// `in_transit → partially_received → received`, `in_transit → received`, and any
/// non-terminal status `→ cancelled`. `received` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemittanceStatus {
    InTransit,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl RemittanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemittanceStatus::Received | RemittanceStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemittanceStatus::InTransit => "in_transit",
            RemittanceStatus::PartiallyReceived => "partially_received",
            RemittanceStatus::Received => "received",
            RemittanceStatus::Cancelled => "cancelled",
        }
    }
}

/// Supplier identity as printed on the delivery document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Supplier {
    pub name: String,
    pub tax_id: Option<String>,
}

impl Supplier {
    pub fn new(name: impl Into<String>, tax_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            tax_id,
        }
    }

    /// Stable identity used for duplicate detection: the tax id when known,
    /// otherwise the normalized name.
    pub fn identity_key(&self) -> String {
        match self.tax_id.as_deref().map(str::trim) {
            Some(tax_id) if !tax_id.is_empty() => {
                tax_id.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
            }
            _ => self
                .name
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
        }
    }
}

impl core::fmt::Display for Supplier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.tax_id {
            Some(tax_id) => write!(f, "{} ({tax_id})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Identity of a delivery document; at most one active remittance per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub firm_id: FirmId,
    pub document_number: String,
    pub date: NaiveDate,
    pub supplier: String,
}

impl DocumentKey {
    pub fn new(
        firm_id: FirmId,
        document_number: &str,
        date: NaiveDate,
        supplier: &Supplier,
    ) -> Self {
        Self {
            firm_id,
            document_number: document_number.trim().to_uppercase(),
            date,
            supplier: supplier.identity_key(),
        }
    }
}

/// Link between a remittance line and the input its stock is booked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "input_id", rename_all = "snake_case")]
pub enum InputLink {
    Linked(InputId),
    Unlinked,
}

impl InputLink {
    pub fn input_id(&self) -> Option<InputId> {
        match self {
            InputLink::Linked(id) => Some(*id),
            InputLink::Unlinked => None,
        }
    }
}

/// Batch / lot metadata printed on a delivered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_number: Option<String>,
    pub expires_on: Option<NaiveDate>,
}

/// Remittance line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemittanceItem {
    pub id: RemittanceItemId,
    pub line_no: u32,
    pub description: String,
    pub unit: String,
    pub category: InputCategory,
    pub quantity_ordered: Decimal,
    /// Cumulative quantity received so far.
    pub quantity_received: Decimal,
    pub link: InputLink,
    /// Received quantity not yet booked because the line has no input.
    pub pending_quantity: Decimal,
    pub batch: Option<BatchInfo>,
}

impl RemittanceItem {
    pub fn is_fully_received(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }

    pub fn needs_input(&self) -> bool {
        self.link == InputLink::Unlinked && self.pending_quantity > Decimal::ZERO
    }
}

impl Entity for RemittanceItem {
    type Id = RemittanceItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One `receive` call as recorded in the document history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub received_by: UserId,
    pub received_at: DateTime<Utc>,
    pub lines: Vec<ReceivedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: DateTime<Utc>,
}

/// Aggregate root: Remittance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remittance {
    id: RemittanceId,
    firm_id: Option<FirmId>,
    document_number: String,
    date: NaiveDate,
    supplier: Option<Supplier>,
    depot_id: Option<DepotId>,
    status: RemittanceStatus,
    items: Vec<RemittanceItem>,
    receipts: Vec<Receipt>,
    cancellation: Option<Cancellation>,
    version: u64,
    created: bool,
}

impl Remittance {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RemittanceId) -> Self {
        Self {
            id,
            firm_id: None,
            document_number: String::new(),
            date: NaiveDate::default(),
            supplier: None,
            depot_id: None,
            status: RemittanceStatus::InTransit,
            items: Vec::new(),
            receipts: Vec::new(),
            cancellation: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RemittanceId {
        self.id
    }

    pub fn firm_id(&self) -> Option<FirmId> {
        self.firm_id
    }

    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn supplier(&self) -> Option<&Supplier> {
        self.supplier.as_ref()
    }

    pub fn depot_id(&self) -> Option<DepotId> {
        self.depot_id
    }

    pub fn status(&self) -> RemittanceStatus {
        self.status
    }

    pub fn items(&self) -> &[RemittanceItem] {
        &self.items
    }

    pub fn item(&self, item_id: RemittanceItemId) -> Option<&RemittanceItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Duplicate-detection key; `None` before creation.
    pub fn document_key(&self) -> Option<DocumentKey> {
        match (self.firm_id, &self.supplier) {
            (Some(firm_id), Some(supplier)) if self.created => Some(DocumentKey::new(
                firm_id,
                &self.document_number,
                self.date,
                supplier,
            )),
            _ => None,
        }
    }

    /// Active remittances take part in duplicate detection; cancelled ones do not.
    pub fn is_active(&self) -> bool {
        self.created && self.status != RemittanceStatus::Cancelled
    }

    /// Items whose received quantity is waiting for an input to be booked on.
    pub fn items_needing_input(&self) -> Vec<&RemittanceItem> {
        self.items.iter().filter(|i| i.needs_input()).collect()
    }
}

impl AggregateRoot for Remittance {
    type Id = RemittanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// New line supplied when a remittance is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRemittanceItem {
    pub item_id: RemittanceItemId,
    pub description: String,
    pub unit: String,
    pub category: InputCategory,
    pub quantity_ordered: Quantity,
    pub input_id: Option<InputId>,
    pub batch: Option<BatchInfo>,
}

/// Command: CreateRemittance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRemittance {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub document_number: String,
    pub date: NaiveDate,
    pub supplier: Supplier,
    pub depot_id: DepotId,
    pub items: Vec<NewRemittanceItem>,
    pub occurred_at: DateTime<Utc>,
}

/// One line of a receipt: the cumulative quantity received so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReceipt {
    pub item_id: RemittanceItemId,
    pub quantity_received_cumulative: Decimal,
    pub batch: Option<BatchInfo>,
}

/// Command: RecordReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub received_by: UserId,
    pub updates: Vec<ItemReceipt>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LinkInput.
///
/// `input_depot_id` is the depot currently holding the input; it must be the
/// remittance's depot of entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInput {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub item_id: RemittanceItemId,
    pub input_id: InputId,
    pub input_depot_id: DepotId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelRemittance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRemittance {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub reason: String,
    pub cancelled_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemittanceCommand {
    CreateRemittance(CreateRemittance),
    RecordReceipt(RecordReceipt),
    LinkInput(LinkInput),
    CancelRemittance(CancelRemittance),
}

/// Event: RemittanceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemittanceCreated {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub document_number: String,
    pub date: NaiveDate,
    pub supplier: Supplier,
    pub depot_id: DepotId,
    pub items: Vec<RemittanceItem>,
    pub occurred_at: DateTime<Utc>,
}

/// What happens to a positive receipt delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeltaDisposition {
    /// Book immediately as an entry movement on the linked input.
    Book { input_id: InputId },
    /// Hold until an input is linked to the line.
    Defer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub item_id: RemittanceItemId,
    pub previous_cumulative: Decimal,
    pub cumulative: Decimal,
    pub delta: Decimal,
    pub disposition: DeltaDisposition,
    pub batch: Option<BatchInfo>,
}

/// Event: ItemsReceived (only lines with a positive delta are recorded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsReceived {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub received_by: UserId,
    pub lines: Vec<ReceivedLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub from: RemittanceStatus,
    pub to: RemittanceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InputLinked. `released` is the deferred quantity to book now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLinked {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub item_id: RemittanceItemId,
    pub input_id: InputId,
    pub released: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RemittanceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemittanceCancelled {
    pub firm_id: FirmId,
    pub remittance_id: RemittanceId,
    pub from: RemittanceStatus,
    pub reason: String,
    pub cancelled_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemittanceEvent {
    RemittanceCreated(RemittanceCreated),
    ItemsReceived(ItemsReceived),
    StatusChanged(StatusChanged),
    InputLinked(InputLinked),
    RemittanceCancelled(RemittanceCancelled),
}

impl Event for RemittanceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RemittanceEvent::RemittanceCreated(_) => "reception.remittance.created",
            RemittanceEvent::ItemsReceived(_) => "reception.remittance.items_received",
            RemittanceEvent::StatusChanged(_) => "reception.remittance.status_changed",
            RemittanceEvent::InputLinked(_) => "reception.remittance.input_linked",
            RemittanceEvent::RemittanceCancelled(_) => "reception.remittance.cancelled",
        }
    }

    fn firm_id(&self) -> FirmId {
        match self {
            RemittanceEvent::RemittanceCreated(e) => e.firm_id,
            RemittanceEvent::ItemsReceived(e) => e.firm_id,
            RemittanceEvent::StatusChanged(e) => e.firm_id,
            RemittanceEvent::InputLinked(e) => e.firm_id,
            RemittanceEvent::RemittanceCancelled(e) => e.firm_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RemittanceEvent::RemittanceCreated(e) => e.occurred_at,
            RemittanceEvent::ItemsReceived(e) => e.occurred_at,
            RemittanceEvent::StatusChanged(e) => e.occurred_at,
            RemittanceEvent::InputLinked(e) => e.occurred_at,
            RemittanceEvent::RemittanceCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Remittance {
    type Command = RemittanceCommand;
    type Event = RemittanceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RemittanceEvent::RemittanceCreated(e) => {
                self.id = e.remittance_id;
                self.firm_id = Some(e.firm_id);
                self.document_number = e.document_number.clone();
                self.date = e.date;
                self.supplier = Some(e.supplier.clone());
                self.depot_id = Some(e.depot_id);
                self.status = RemittanceStatus::InTransit;
                self.items = e.items.clone();
                self.receipts.clear();
                self.cancellation = None;
                self.created = true;
            }
            RemittanceEvent::ItemsReceived(e) => {
                for line in &e.lines {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == line.item_id) {
                        item.quantity_received = line.cumulative;
                        if line.disposition == DeltaDisposition::Defer {
                            item.pending_quantity =
                                item.pending_quantity.saturating_add(line.delta);
                        }
                        if line.batch.is_some() {
                            item.batch = line.batch.clone();
                        }
                    }
                }
                self.receipts.push(Receipt {
                    received_by: e.received_by,
                    received_at: e.occurred_at,
                    lines: e.lines.clone(),
                });
            }
            RemittanceEvent::StatusChanged(e) => {
                self.status = e.to;
            }
            RemittanceEvent::InputLinked(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.link = InputLink::Linked(e.input_id);
                    item.pending_quantity = Decimal::ZERO;
                }
            }
            RemittanceEvent::RemittanceCancelled(e) => {
                self.status = RemittanceStatus::Cancelled;
                self.cancellation = Some(Cancellation {
                    reason: e.reason.clone(),
                    cancelled_by: e.cancelled_by,
                    cancelled_at: e.occurred_at,
                });
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RemittanceCommand::CreateRemittance(cmd) => self.handle_create(cmd),
            RemittanceCommand::RecordReceipt(cmd) => self.handle_receipt(cmd),
            RemittanceCommand::LinkInput(cmd) => self.handle_link(cmd),
            RemittanceCommand::CancelRemittance(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Remittance {
    fn ensure_firm(&self, firm_id: FirmId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.firm_id != Some(firm_id) {
            return Err(DomainError::invariant("firm mismatch"));
        }
        Ok(())
    }

    fn ensure_remittance_id(&self, remittance_id: RemittanceId) -> Result<(), DomainError> {
        if self.id != remittance_id {
            return Err(DomainError::invariant("remittance_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("remittance {}", self.id)));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("remittance {} ({})", self.document_number, self.status.as_str())
    }

    fn handle_create(&self, cmd: &CreateRemittance) -> Result<Vec<RemittanceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "remittance {} already exists",
                cmd.remittance_id
            )));
        }
        if cmd.document_number.trim().is_empty() {
            return Err(DomainError::validation("document number cannot be empty"));
        }
        if cmd.supplier.name.trim().is_empty() {
            return Err(DomainError::validation("supplier name cannot be empty"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "a remittance needs at least one item",
            ));
        }

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(cmd.items.len());
        for (idx, new_item) in cmd.items.iter().enumerate() {
            if !seen.insert(new_item.item_id) {
                return Err(DomainError::validation(format!(
                    "duplicate item id {} in remittance",
                    new_item.item_id
                )));
            }
            if new_item.description.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "item {} has an empty description",
                    idx + 1
                )));
            }
            if new_item.unit.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "item {} has an empty unit",
                    idx + 1
                )));
            }
            items.push(RemittanceItem {
                id: new_item.item_id,
                line_no: (idx as u32) + 1,
                description: new_item.description.trim().to_string(),
                unit: new_item.unit.trim().to_string(),
                category: new_item.category,
                quantity_ordered: new_item.quantity_ordered.value(),
                quantity_received: Decimal::ZERO,
                link: new_item
                    .input_id
                    .map(InputLink::Linked)
                    .unwrap_or(InputLink::Unlinked),
                pending_quantity: Decimal::ZERO,
                batch: new_item.batch.clone(),
            });
        }

        Ok(vec![RemittanceEvent::RemittanceCreated(RemittanceCreated {
            firm_id: cmd.firm_id,
            remittance_id: cmd.remittance_id,
            document_number: cmd.document_number.trim().to_string(),
            date: cmd.date,
            supplier: Supplier::new(cmd.supplier.name.trim(), cmd.supplier.tax_id.clone()),
            depot_id: cmd.depot_id,
            items,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receipt(&self, cmd: &RecordReceipt) -> Result<Vec<RemittanceEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_firm(cmd.firm_id)?;
        self.ensure_remittance_id(cmd.remittance_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "{} is terminal; receipts are not permitted",
                self.describe()
            )));
        }
        if cmd.updates.is_empty() {
            return Err(DomainError::validation(
                "a receipt must include at least one item",
            ));
        }

        let mut seen = HashSet::new();
        let mut lines = Vec::new();
        for update in &cmd.updates {
            if !seen.insert(update.item_id) {
                return Err(DomainError::validation(format!(
                    "item {} appears more than once in the receipt",
                    update.item_id
                )));
            }
            let item = self.item(update.item_id).ok_or_else(|| {
                DomainError::not_found(format!(
                    "item {} in remittance {}",
                    update.item_id, self.document_number
                ))
            })?;

            if update.quantity_received_cumulative < Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "received quantity for item '{}' of remittance {} cannot be negative (got {})",
                    item.description, self.document_number, update.quantity_received_cumulative
                )));
            }
            // Both sides are non-negative, so the difference stays in range.
            let delta = update.quantity_received_cumulative - item.quantity_received;
            if delta < Decimal::ZERO {
                return Err(DomainError::invalid_transition(format!(
                    "receipt for item '{}' of remittance {} is not cumulative: \
                     previously received {}, now {} (delta {})",
                    item.description,
                    self.document_number,
                    item.quantity_received,
                    update.quantity_received_cumulative,
                    delta
                )));
            }
            if delta == Decimal::ZERO {
                continue;
            }

            let disposition = match item.link {
                InputLink::Linked(input_id) => DeltaDisposition::Book { input_id },
                InputLink::Unlinked => {
                    if item.pending_quantity.checked_add(delta).is_none() {
                        return Err(DomainError::validation(format!(
                            "pending quantity of item '{}' is out of range",
                            item.description
                        )));
                    }
                    DeltaDisposition::Defer
                }
            };
            lines.push(ReceivedLine {
                item_id: item.id,
                previous_cumulative: item.quantity_received,
                cumulative: update.quantity_received_cumulative,
                delta,
                disposition,
                batch: update.batch.clone(),
            });
        }

        if lines.is_empty() {
            return Ok(vec![]);
        }

        let next_status = self.status_after(&lines);
        let mut events = vec![RemittanceEvent::ItemsReceived(ItemsReceived {
            firm_id: cmd.firm_id,
            remittance_id: cmd.remittance_id,
            received_by: cmd.received_by,
            lines,
            occurred_at: cmd.occurred_at,
        })];
        if next_status != self.status {
            events.push(RemittanceEvent::StatusChanged(StatusChanged {
                firm_id: cmd.firm_id,
                remittance_id: cmd.remittance_id,
                from: self.status,
                to: next_status,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    /// Status implied by the received quantities once `lines` are applied.
    fn status_after(&self, lines: &[ReceivedLine]) -> RemittanceStatus {
        let received = |item: &RemittanceItem| {
            lines
                .iter()
                .find(|l| l.item_id == item.id)
                .map(|l| l.cumulative)
                .unwrap_or(item.quantity_received)
        };

        if self.items.iter().all(|i| received(i) >= i.quantity_ordered) {
            RemittanceStatus::Received
        } else if self.items.iter().any(|i| received(i) > Decimal::ZERO) {
            RemittanceStatus::PartiallyReceived
        } else {
            self.status
        }
    }

    fn handle_link(&self, cmd: &LinkInput) -> Result<Vec<RemittanceEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_firm(cmd.firm_id)?;
        self.ensure_remittance_id(cmd.remittance_id)?;

        if self.status == RemittanceStatus::Cancelled {
            return Err(DomainError::invalid_transition(format!(
                "{} is cancelled; items cannot be linked",
                self.describe()
            )));
        }

        let item = self.item(cmd.item_id).ok_or_else(|| {
            DomainError::not_found(format!(
                "item {} in remittance {}",
                cmd.item_id, self.document_number
            ))
        })?;

        match item.link {
            InputLink::Linked(current) if current == cmd.input_id => return Ok(vec![]),
            InputLink::Linked(current) => {
                return Err(DomainError::invalid_transition(format!(
                    "item '{}' is already linked to input {current}",
                    item.description
                )));
            }
            InputLink::Unlinked => {}
        }

        if Some(cmd.input_depot_id) != self.depot_id {
            return Err(DomainError::validation(format!(
                "input {} is not held at the depot of entry of remittance {}",
                cmd.input_id, self.document_number
            )));
        }

        Ok(vec![RemittanceEvent::InputLinked(InputLinked {
            firm_id: cmd.firm_id,
            remittance_id: cmd.remittance_id,
            item_id: cmd.item_id,
            input_id: cmd.input_id,
            released: item.pending_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelRemittance) -> Result<Vec<RemittanceEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_firm(cmd.firm_id)?;
        self.ensure_remittance_id(cmd.remittance_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "{} is terminal and cannot be cancelled",
                self.describe()
            )));
        }
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("a cancellation reason is required"));
        }

        Ok(vec![RemittanceEvent::RemittanceCancelled(RemittanceCancelled {
            firm_id: cmd.firm_id,
            remittance_id: cmd.remittance_id,
            from: self.status,
            reason: reason.to_string(),
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_firm_id() -> FirmId {
        FirmId::new()
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn seed_item(ordered: Decimal, input_id: Option<InputId>) -> NewRemittanceItem {
        NewRemittanceItem {
            item_id: RemittanceItemId::generate(),
            description: "Seed X".to_string(),
            unit: "bag".to_string(),
            category: InputCategory::Seed,
            quantity_ordered: Quantity::new(ordered).unwrap(),
            input_id,
            batch: None,
        }
    }

    fn created(firm_id: FirmId, depot_id: DepotId, items: Vec<NewRemittanceItem>) -> Remittance {
        let remittance_id = RemittanceId::generate();
        let mut remittance = Remittance::empty(remittance_id);
        remittance
            .execute(&RemittanceCommand::CreateRemittance(CreateRemittance {
                firm_id,
                remittance_id,
                document_number: "R-0001-00004521".to_string(),
                date: test_date(),
                supplier: Supplier::new("Agro Supplies SA", Some("30-71234567-8".to_string())),
                depot_id,
                items,
                occurred_at: test_time(),
            }))
            .unwrap();
        remittance
    }

    fn receipt(
        remittance: &Remittance,
        updates: Vec<(RemittanceItemId, Decimal)>,
    ) -> RemittanceCommand {
        RemittanceCommand::RecordReceipt(RecordReceipt {
            firm_id: remittance.firm_id().unwrap(),
            remittance_id: remittance.id_typed(),
            received_by: test_user_id(),
            updates: updates
                .into_iter()
                .map(|(item_id, cumulative)| ItemReceipt {
                    item_id,
                    quantity_received_cumulative: cumulative,
                    batch: None,
                })
                .collect(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_starts_in_transit_with_unlinked_items() {
        let remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(50), None)],
        );
        assert_eq!(remittance.status(), RemittanceStatus::InTransit);
        assert_eq!(remittance.items()[0].link, InputLink::Unlinked);
        assert_eq!(remittance.items()[0].line_no, 1);
        assert!(remittance.is_active());
    }

    #[test]
    fn create_requires_items() {
        let remittance_id = RemittanceId::generate();
        let err = Remittance::empty(remittance_id)
            .handle(&RemittanceCommand::CreateRemittance(CreateRemittance {
                firm_id: test_firm_id(),
                remittance_id,
                document_number: "R-1".to_string(),
                date: test_date(),
                supplier: Supplier::new("Coop", None),
                depot_id: DepotId::generate(),
                items: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn partial_receipt_of_unlinked_item_is_deferred() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(50), None)],
        );
        let item_id = remittance.items()[0].id;

        let events = remittance.execute(&receipt(&remittance, vec![(item_id, dec!(20))])).unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            RemittanceEvent::ItemsReceived(e) => {
                assert_eq!(e.lines[0].delta, dec!(20));
                assert_eq!(e.lines[0].disposition, DeltaDisposition::Defer);
            }
            other => panic!("expected ItemsReceived, got {other:?}"),
        }
        assert_eq!(remittance.status(), RemittanceStatus::PartiallyReceived);
        assert_eq!(remittance.items_needing_input().len(), 1);
        assert_eq!(remittance.items()[0].pending_quantity, dec!(20));
        assert_eq!(remittance.receipts().len(), 1);
    }

    #[test]
    fn linked_item_books_delta_and_completes() {
        let input_id = InputId::generate();
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(50), Some(input_id))],
        );
        let item_id = remittance.items()[0].id;

        let events = remittance.execute(&receipt(&remittance, vec![(item_id, dec!(50))])).unwrap();
        match &events[0] {
            RemittanceEvent::ItemsReceived(e) => {
                assert_eq!(e.lines[0].disposition, DeltaDisposition::Book { input_id });
            }
            other => panic!("expected ItemsReceived, got {other:?}"),
        }
        match &events[1] {
            RemittanceEvent::StatusChanged(e) => {
                assert_eq!(e.from, RemittanceStatus::InTransit);
                assert_eq!(e.to, RemittanceStatus::Received);
            }
            other => panic!("expected StatusChanged, got {other:?}"),
        }
        assert!(remittance.items_needing_input().is_empty());
    }

    #[test]
    fn unchanged_receipt_is_a_no_op() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(50), None)],
        );
        let item_id = remittance.items()[0].id;
        remittance.execute(&receipt(&remittance, vec![(item_id, dec!(20))])).unwrap();
        let version = remittance.version();

        let events = remittance.execute(&receipt(&remittance, vec![(item_id, dec!(20))])).unwrap();
        assert!(events.is_empty());
        assert_eq!(remittance.version(), version);
        assert_eq!(remittance.status(), RemittanceStatus::PartiallyReceived);
    }

    #[test]
    fn decreasing_cumulative_is_rejected() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(50), None)],
        );
        let item_id = remittance.items()[0].id;
        remittance.execute(&receipt(&remittance, vec![(item_id, dec!(20))])).unwrap();

        let err = remittance.handle(&receipt(&remittance, vec![(item_id, dec!(15))])).unwrap_err();
        match err {
            DomainError::InvalidTransition(msg) => assert!(msg.contains("not cumulative")),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn negative_cumulative_is_rejected() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(50), None)],
        );
        let item_id = remittance.items()[0].id;
        remittance.execute(&receipt(&remittance, vec![(item_id, dec!(20))])).unwrap();

        for cumulative in [dec!(-1), Decimal::MIN] {
            let err = remittance
                .handle(&receipt(&remittance, vec![(item_id, cumulative)]))
                .unwrap_err();
            match err {
                DomainError::Validation(msg) => assert!(msg.contains("cannot be negative")),
                other => panic!("expected Validation, got {other:?}"),
            }
        }
        assert_eq!(remittance.items()[0].quantity_received, dec!(20));
        assert_eq!(remittance.items()[0].pending_quantity, dec!(20));
    }

    #[test]
    fn receipts_on_terminal_documents_are_rejected() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(5), None)],
        );
        let item_id = remittance.items()[0].id;
        remittance.execute(&receipt(&remittance, vec![(item_id, dec!(5))])).unwrap();
        assert_eq!(remittance.status(), RemittanceStatus::Received);

        let err = remittance.handle(&receipt(&remittance, vec![(item_id, dec!(6))])).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn unknown_and_repeated_items_are_rejected() {
        let remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(5), None)],
        );
        let item_id = remittance.items()[0].id;

        let err = remittance
            .handle(&receipt(&remittance, vec![(RemittanceItemId::generate(), dec!(1))]))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let err = remittance
            .handle(&receipt(&remittance, vec![(item_id, dec!(1)), (item_id, dec!(2))]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn all_zero_receipt_keeps_in_transit() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(5), None)],
        );
        let item_id = remittance.items()[0].id;
        let events = remittance
            .execute(&receipt(&remittance, vec![(item_id, Decimal::ZERO)]))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(remittance.status(), RemittanceStatus::InTransit);
    }

    #[test]
    fn over_receipt_counts_as_received() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(5), None)],
        );
        let item_id = remittance.items()[0].id;
        remittance.execute(&receipt(&remittance, vec![(item_id, dec!(5.5))])).unwrap();
        assert_eq!(remittance.status(), RemittanceStatus::Received);
    }

    #[test]
    fn linking_releases_pending_quantity_once() {
        let depot_id = DepotId::generate();
        let mut remittance = created(test_firm_id(), depot_id, vec![seed_item(dec!(50), None)]);
        let item_id = remittance.items()[0].id;
        remittance.execute(&receipt(&remittance, vec![(item_id, dec!(20))])).unwrap();

        let input_id = InputId::generate();
        let link = RemittanceCommand::LinkInput(LinkInput {
            firm_id: remittance.firm_id().unwrap(),
            remittance_id: remittance.id_typed(),
            item_id,
            input_id,
            input_depot_id: depot_id,
            occurred_at: test_time(),
        });
        let events = remittance.execute(&link).unwrap();
        match &events[0] {
            RemittanceEvent::InputLinked(e) => assert_eq!(e.released, dec!(20)),
            other => panic!("expected InputLinked, got {other:?}"),
        }
        assert_eq!(remittance.items()[0].link, InputLink::Linked(input_id));
        assert_eq!(remittance.items()[0].pending_quantity, Decimal::ZERO);

        // Re-linking the same input is a no-op.
        assert!(remittance.execute(&link).unwrap().is_empty());
    }

    #[test]
    fn linking_to_another_input_or_depot_is_rejected() {
        let depot_id = DepotId::generate();
        let first = InputId::generate();
        let remittance = created(test_firm_id(), depot_id, vec![seed_item(dec!(50), Some(first))]);
        let item_id = remittance.items()[0].id;

        let err = remittance
            .handle(&RemittanceCommand::LinkInput(LinkInput {
                firm_id: remittance.firm_id().unwrap(),
                remittance_id: remittance.id_typed(),
                item_id,
                input_id: InputId::generate(),
                input_depot_id: depot_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        let unlinked = created(test_firm_id(), depot_id, vec![seed_item(dec!(50), None)]);
        let err = unlinked
            .handle(&RemittanceCommand::LinkInput(LinkInput {
                firm_id: unlinked.firm_id().unwrap(),
                remittance_id: unlinked.id_typed(),
                item_id: unlinked.items()[0].id,
                input_id: InputId::generate(),
                input_depot_id: DepotId::generate(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancel_requires_reason_and_non_terminal_status() {
        let mut remittance = created(
            test_firm_id(),
            DepotId::generate(),
            vec![seed_item(dec!(5), None)],
        );
        let cancel = |reason: &str, r: &Remittance| {
            RemittanceCommand::CancelRemittance(CancelRemittance {
                firm_id: r.firm_id().unwrap(),
                remittance_id: r.id_typed(),
                reason: reason.to_string(),
                cancelled_by: Some(test_user_id()),
                occurred_at: test_time(),
            })
        };

        let err = remittance.handle(&cancel("   ", &remittance)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        remittance.execute(&cancel("supplier sent wrong product", &remittance)).unwrap();
        assert_eq!(remittance.status(), RemittanceStatus::Cancelled);
        assert!(!remittance.is_active());
        assert_eq!(
            remittance.cancellation().map(|c| c.reason.as_str()),
            Some("supplier sent wrong product")
        );

        let err = remittance.handle(&cancel("again", &remittance)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn document_key_normalizes_number_and_supplier() {
        let firm_id = test_firm_id();
        let a = DocumentKey::new(
            firm_id,
            " r-0001 ",
            test_date(),
            &Supplier::new("Coop", Some("30-7123".to_string())),
        );
        let b = DocumentKey::new(
            firm_id,
            "R-0001",
            test_date(),
            &Supplier::new("Cooperativa", Some("307123".to_string())),
        );
        assert_eq!(a, b);

        let c = DocumentKey::new(
            firm_id,
            "R-0001",
            test_date(),
            &Supplier::new("  Agro   Norte ", None),
        );
        let d = DocumentKey::new(
            firm_id,
            "R-0001",
            test_date(),
            &Supplier::new("agro norte", None),
        );
        assert_eq!(c, d);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: receipts are accepted iff cumulative values never decrease,
        /// and the deferred quantity always equals the cumulative received.
        #[test]
        fn deferred_quantity_tracks_cumulative_receipts(
            cumulatives in prop::collection::vec(0i64..200i64, 1..20)
        ) {
            let mut remittance = created(
                test_firm_id(),
                DepotId::generate(),
                vec![seed_item(dec!(100), None)],
            );
            let item_id = remittance.items()[0].id;
            let mut high_water = Decimal::ZERO;

            for c in cumulatives {
                let cumulative = Decimal::from(c);
                if remittance.status().is_terminal() {
                    break;
                }
                let result = remittance.execute(&receipt(&remittance, vec![(item_id, cumulative)]));
                if cumulative < high_water {
                    prop_assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
                } else {
                    prop_assert!(result.is_ok());
                    high_water = cumulative;
                }
                prop_assert_eq!(remittance.items()[0].quantity_received, high_water);
                prop_assert_eq!(remittance.items()[0].pending_quantity, high_water);
            }
        }
    }
}
