use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agroledger_core::{DomainError, DomainResult};

use crate::alert::AlertPriority;
use crate::rules;
use crate::snapshot::{EntityKind, EntitySnapshot};

/// Outcome of one rule predicate on one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The condition holds; an alert should be pending.
    Triggered,
    /// The condition does not hold; a pending alert should be auto-resolved.
    Clear,
    /// The rule cannot be evaluated for this entity (missing data).
    Inapplicable,
}

/// Human-readable alert text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub title: String,
    pub description: String,
}

/// Tunable rule parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleParams {
    pub expiry_window_days: i64,
    pub depot_stale_days: i64,
    pub measurement_stale_days: i64,
    pub ndvi_threshold: Decimal,
}

impl Default for RuleParams {
    fn default() -> Self {
        Self {
            expiry_window_days: 30,
            depot_stale_days: 90,
            measurement_stale_days: 30,
            ndvi_threshold: Decimal::new(3, 1),
        }
    }
}

/// Evaluation context shared by every rule in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleContext {
    pub today: NaiveDate,
    pub params: RuleParams,
}

impl RuleContext {
    pub fn new(today: NaiveDate, params: RuleParams) -> Self {
        Self { today, params }
    }

    /// Whole days elapsed between `date` and today (negative for future dates).
    pub fn days_since(&self, date: NaiveDate) -> i64 {
        (self.today - date).num_days()
    }
}

/// A declarative alert rule.
///
/// Rules are stateless values; `evaluate` must be deterministic for a given
/// snapshot and context.
pub trait AlertRule: Send + Sync + 'static {
    /// Stable identifier, part of the alert uniqueness key.
    fn id(&self) -> &'static str;

    fn priority(&self) -> AlertPriority;

    fn applies_to(&self, kind: EntityKind) -> bool;

    fn evaluate(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> RuleOutcome;

    fn render(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> AlertMessage;
}

/// Set of rules evaluated by the alert engine.
pub struct RuleRegistry {
    rules: Vec<Box<dyn AlertRule>>,
    disabled: BTreeSet<String>,
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            disabled: BTreeSet::new(),
        }
    }

    /// Registry holding every built-in rule.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for rule in rules::builtin() {
            registry.rules.push(rule);
        }
        registry
    }

    /// Add a rule. Rule ids must be unique.
    pub fn register(&mut self, rule: Box<dyn AlertRule>) -> DomainResult<()> {
        if self.get(rule.id()).is_some() {
            return Err(DomainError::conflict(format!(
                "alert rule '{}' is already registered",
                rule.id()
            )));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Disable a rule by id. Unknown ids are reported as `NotFound`.
    pub fn disable(&mut self, rule_id: &str) -> DomainResult<()> {
        if self.get(rule_id).is_none() {
            return Err(DomainError::not_found(format!("alert rule '{rule_id}'")));
        }
        self.disabled.insert(rule_id.to_string());
        Ok(())
    }

    pub fn is_enabled(&self, rule_id: &str) -> bool {
        self.get(rule_id).is_some() && !self.disabled.contains(rule_id)
    }

    pub fn get(&self, rule_id: &str) -> Option<&dyn AlertRule> {
        self.rules.iter().find(|r| r.id() == rule_id).map(|r| r.as_ref())
    }

    /// Enabled rules applicable to `kind`, in registration order.
    pub fn applicable(&self, kind: EntityKind) -> impl Iterator<Item = &dyn AlertRule> {
        self.rules
            .iter()
            .map(|r| r.as_ref())
            .filter(move |r| r.applies_to(kind) && !self.disabled.contains(r.id()))
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl core::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rule_ids())
            .field("disabled", &self.disabled)
            .finish()
    }
}
