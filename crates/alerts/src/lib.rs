//! `agroledger-alerts`
//!
//! **Responsibility:** declarative alert rules evaluated against entity snapshots.
//!
//! This crate stays storage-agnostic:
//! - It does not depend on the inventory or reception aggregates; callers hand in
//!   [`EntitySnapshot`] values built from their own records.
//! - Evaluation is pure. [`plan`] decides which alerts to open and close; the
//!   infrastructure layer persists the decision.

pub mod alert;
pub mod plan;
pub mod rule;
pub mod rules;
pub mod snapshot;

pub use alert::{
    Alert, AlertClosed, AlertEvent, AlertId, AlertPriority, AlertRaised, AlertStatus,
    ClosureReason,
};
pub use plan::{AlertScope, EvaluationPlan, NewAlert, plan};
pub use rule::{AlertMessage, AlertRule, RuleContext, RuleOutcome, RuleParams, RuleRegistry};
pub use snapshot::{
    DepotSnapshot, EntityKind, EntityRef, EntitySnapshot, InputSnapshot, PlotObservation,
};
