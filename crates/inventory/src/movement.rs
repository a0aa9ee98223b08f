use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agroledger_core::{AggregateId, Entity, FirmId, UserId, aggregate_id_newtype};

use crate::depot::DepotId;
use crate::input::InputId;

aggregate_id_newtype!(
    /// Ledger movement identifier.
    MovementId
);

/// Stored movement type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Entry,
    Exit,
    Adjustment,
    Transfer,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entry => "entry",
            MovementType::Exit => "exit",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    Increase,
    Decrease,
}

/// Requested movement kind.
///
/// The sign of the resulting ledger entry is derived from the kind; transfers
/// structurally carry their destination depot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MovementKind {
    Entry,
    Exit,
    Adjustment { direction: AdjustmentDirection },
    Transfer { destination: DepotId },
}

impl MovementKind {
    pub fn movement_type(&self) -> MovementType {
        match self {
            MovementKind::Entry => MovementType::Entry,
            MovementKind::Exit => MovementType::Exit,
            MovementKind::Adjustment { .. } => MovementType::Adjustment,
            MovementKind::Transfer { .. } => MovementType::Transfer,
        }
    }

    /// `true` when the movement takes stock out of the input it is registered on.
    pub fn is_decrease(&self) -> bool {
        matches!(
            self,
            MovementKind::Exit
                | MovementKind::Transfer { .. }
                | MovementKind::Adjustment {
                    direction: AdjustmentDirection::Decrease
                }
        )
    }

    pub fn destination(&self) -> Option<DepotId> {
        match self {
            MovementKind::Transfer { destination } => Some(*destination),
            _ => None,
        }
    }
}

/// Immutable ledger entry changing one input's balance.
///
/// `quantity` is signed. For both legs of a transfer `depot_id` is the source
/// and `destination_depot_id` the destination; the input reference tells which
/// leg it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub firm_id: FirmId,
    pub input_id: InputId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub depot_id: DepotId,
    pub destination_depot_id: Option<DepotId>,
    pub reference: String,
    pub remittance_id: Option<AggregateId>,
    pub registered_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Signed sum of a movement log: the authoritative balance of an input.
///
/// `None` when the running sum leaves the `Decimal` range.
pub fn signed_balance<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> Option<Decimal> {
    movements
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, m| acc.checked_add(m.quantity))
}
