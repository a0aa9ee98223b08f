//! Stock ledger domain module (event-sourced inputs, immutable movements).
//!
//! This crate contains the business rules for consumable inputs held in
//! depots, implemented purely as deterministic domain logic (no IO, no
//! storage). The infrastructure layer runs these decisions inside store
//! transactions.

pub mod depot;
pub mod input;
pub mod movement;

pub use depot::{Depot, DepotId};
pub use input::{
    AcceptTransfer, CreateInput, Input, InputCategory, InputCommand, InputCreated, InputEvent,
    InputId, MovementRegistered, ProductIdentity, RegisterMovement, ThresholdsUpdated,
    UpdateThresholds,
};
pub use movement::{
    AdjustmentDirection, Movement, MovementId, MovementKind, MovementType, signed_balance,
};
