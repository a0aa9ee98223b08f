//! Evaluation planning: rule outcomes diffed against the pending alerts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertId, AlertPriority};
use crate::rule::{AlertMessage, RuleContext, RuleOutcome, RuleRegistry};
use crate::snapshot::{EntityKind, EntityRef, EntitySnapshot};

/// Which entities an evaluation cycle covers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum AlertScope {
    All,
    Kind(EntityKind),
    Entity(EntityRef),
}

impl AlertScope {
    pub fn includes(&self, entity: &EntityRef) -> bool {
        match self {
            AlertScope::All => true,
            AlertScope::Kind(kind) => entity.kind == *kind,
            AlertScope::Entity(target) => target == entity,
        }
    }

    pub fn includes_kind(&self, kind: EntityKind) -> bool {
        match self {
            AlertScope::All => true,
            AlertScope::Kind(k) => *k == kind,
            AlertScope::Entity(target) => target.kind == kind,
        }
    }
}

/// Alert to insert as pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlert {
    pub entity: EntityRef,
    pub rule_id: String,
    pub priority: AlertPriority,
    pub message: AlertMessage,
}

/// Decision of one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationPlan {
    pub to_create: Vec<NewAlert>,
    /// Pending alerts whose rule now evaluates to `Clear`.
    pub to_close: Vec<AlertId>,
}

impl EvaluationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_close.is_empty()
    }
}

/// Evaluate every enabled, applicable rule on every snapshot in scope.
///
/// `pending` are the firm's currently pending alerts; triggered pairs that
/// already have one are left alone, so repeated cycles over unchanged state
/// produce an empty plan.
pub fn plan(
    snapshots: &[EntitySnapshot],
    scope: AlertScope,
    registry: &RuleRegistry,
    pending: &[Alert],
    ctx: &RuleContext,
) -> EvaluationPlan {
    let pending_by_key: HashMap<(EntityRef, &str), AlertId> = pending
        .iter()
        .filter(|a| a.is_pending())
        .map(|a| ((a.entity, a.rule_id.as_str()), a.id))
        .collect();

    let mut out = EvaluationPlan::default();
    for snapshot in snapshots {
        let entity = snapshot.entity_ref();
        if !scope.includes(&entity) {
            continue;
        }
        for rule in registry.applicable(entity.kind) {
            let existing = pending_by_key.get(&(entity, rule.id())).copied();
            match (rule.evaluate(snapshot, ctx), existing) {
                (RuleOutcome::Triggered, None) => {
                    // Guard against the same entity appearing twice in the input.
                    let duplicate = out
                        .to_create
                        .iter()
                        .any(|n| n.entity == entity && n.rule_id == rule.id());
                    if !duplicate {
                        out.to_create.push(NewAlert {
                            entity,
                            rule_id: rule.id().to_string(),
                            priority: rule.priority(),
                            message: rule.render(snapshot, ctx),
                        });
                    }
                }
                (RuleOutcome::Clear, Some(alert_id)) => {
                    if !out.to_close.contains(&alert_id) {
                        out.to_close.push(alert_id);
                    }
                }
                (RuleOutcome::Triggered, Some(_))
                | (RuleOutcome::Clear, None)
                | (RuleOutcome::Inapplicable, _) => {}
            }
        }
    }
    out
}
