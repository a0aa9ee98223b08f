//! Alert evaluation engine.
//!
//! Builds entity snapshots from the store, runs the rule registry over them
//! and persists the resulting plan in one transaction. At most one alert per
//! (firm, entity, rule) is pending at any time; the store enforces it.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use agroledger_alerts::{
    Alert, AlertEvent, AlertId, AlertScope, ClosureReason, DepotSnapshot, EntityKind,
    EntitySnapshot, InputSnapshot, PlotObservation, RuleContext, RuleParams, RuleRegistry, plan,
};
use agroledger_core::{AggregateRoot, ExpectedVersion, FirmId};
use agroledger_events::{EventBus, EventEnvelope};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, PENDING_ALERT_CONSTRAINT};
use crate::publish::{ALERT_AGGREGATE, Outbox};
use crate::store::{LedgerStore, LedgerTx};

/// Alerts opened and closed by one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub created: Vec<Alert>,
    pub closed: Vec<Alert>,
}

#[derive(Debug)]
pub struct AlertEngine<S, B> {
    store: S,
    bus: B,
    registry: RuleRegistry,
    params: RuleParams,
}

impl<S, B> AlertEngine<S, B> {
    /// Engine with the built-in rules, minus the ones disabled in `config`.
    pub fn new(store: S, bus: B, config: &LedgerConfig) -> Self {
        let mut registry = RuleRegistry::with_defaults();
        for rule_id in &config.disabled_rules {
            if let Err(e) = registry.disable(rule_id) {
                warn!(rule = %rule_id, error = %e, "ignoring unknown rule in disabled list");
            }
        }
        Self::with_registry(store, bus, registry, config.rules.clone())
    }

    pub fn with_registry(store: S, bus: B, registry: RuleRegistry, params: RuleParams) -> Self {
        Self {
            store,
            bus,
            registry,
            params,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }
}

impl<S, B> AlertEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn evaluate_alerts(
        &self,
        firm_id: FirmId,
        scope: AlertScope,
    ) -> Result<EvaluationOutcome, LedgerError> {
        self.evaluate_alerts_on(firm_id, scope, Utc::now().date_naive())
    }

    /// Evaluate as of `today` (rules compare dates against it).
    pub fn evaluate_alerts_on(
        &self,
        firm_id: FirmId,
        scope: AlertScope,
        today: NaiveDate,
    ) -> Result<EvaluationOutcome, LedgerError> {
        let ctx = RuleContext::new(today, self.params.clone());
        let mut outbox = Outbox::new();

        let outcome = self.store.transaction(|tx| {
            let snapshots = collect_snapshots(tx, firm_id, scope)?;
            let pending = tx.pending_alerts(firm_id)?;
            let decided = plan(&snapshots, scope, &self.registry, &pending, &ctx);
            if decided.is_empty() {
                return Ok::<_, LedgerError>(EvaluationOutcome::default());
            }

            let now = Utc::now();
            let mut outcome = EvaluationOutcome::default();

            for new in decided.to_create {
                let (alert, event) = Alert::raise(
                    AlertId::generate(),
                    firm_id,
                    new.entity,
                    new.rule_id,
                    new.priority,
                    new.message,
                    now,
                );
                match tx.insert_alert(&alert) {
                    Ok(()) => {}
                    Err(e) if e.is_unique_violation(PENDING_ALERT_CONSTRAINT) => {
                        debug!(
                            firm = %firm_id,
                            entity = %alert.entity,
                            rule = %alert.rule_id,
                            "alert already pending; skipped"
                        );
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
                record(&mut outbox, &alert, &event)?;
                outcome.created.push(alert);
            }

            for alert_id in decided.to_close {
                let alert = close_in(
                    tx,
                    firm_id,
                    alert_id,
                    ClosureReason::AutoResolved,
                    &mut outbox,
                )?;
                outcome.closed.push(alert);
            }
            Ok(outcome)
        })?;

        for alert in &outcome.created {
            info!(
                firm = %firm_id,
                alert_id = %alert.id,
                entity = %alert.entity,
                rule = %alert.rule_id,
                priority = ?alert.priority,
                "alert raised"
            );
        }
        for alert in &outcome.closed {
            info!(
                firm = %firm_id,
                alert_id = %alert.id,
                entity = %alert.entity,
                rule = %alert.rule_id,
                "alert auto-resolved"
            );
        }
        outbox.publish(&self.bus)?;
        Ok(outcome)
    }

    /// Mark a pending alert as handled.
    pub fn resolve_alert(&self, firm_id: FirmId, alert_id: AlertId) -> Result<Alert, LedgerError> {
        self.close(firm_id, alert_id, ClosureReason::Resolved)
    }

    /// Dismiss a pending alert. A later triggered evaluation opens a new one.
    pub fn cancel_alert(&self, firm_id: FirmId, alert_id: AlertId) -> Result<Alert, LedgerError> {
        self.close(firm_id, alert_id, ClosureReason::Cancelled)
    }

    pub fn pending_alerts(&self, firm_id: FirmId) -> Result<Vec<Alert>, LedgerError> {
        self.store.transaction(|tx| Ok(tx.pending_alerts(firm_id)?))
    }

    pub fn alert(&self, firm_id: FirmId, alert_id: AlertId) -> Result<Alert, LedgerError> {
        self.store.transaction(|tx| {
            tx.alert(firm_id, alert_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("alert {alert_id}")))
        })
    }

    /// Store the latest measurements of a plot for the plot rules.
    pub fn record_plot_observation(
        &self,
        firm_id: FirmId,
        observation: PlotObservation,
    ) -> Result<(), LedgerError> {
        if observation.firm_id != firm_id {
            return Err(LedgerError::Validation(format!(
                "observation of plot {} belongs to another firm",
                observation.plot_id
            )));
        }
        observation.validate()?;
        let plot_id = observation.plot_id;
        self.store
            .transaction(|tx| Ok::<_, LedgerError>(tx.upsert_plot_observation(observation)?))?;
        debug!(firm = %firm_id, plot_id = %plot_id, "plot observation recorded");
        Ok(())
    }

    fn close(
        &self,
        firm_id: FirmId,
        alert_id: AlertId,
        reason: ClosureReason,
    ) -> Result<Alert, LedgerError> {
        let mut outbox = Outbox::new();
        let alert = self
            .store
            .transaction(|tx| close_in(tx, firm_id, alert_id, reason, &mut outbox))?;
        info!(
            firm = %firm_id,
            alert_id = %alert_id,
            rule = %alert.rule_id,
            reason = ?reason,
            "alert closed"
        );
        outbox.publish(&self.bus)?;
        Ok(alert)
    }
}

fn record(outbox: &mut Outbox, alert: &Alert, event: &AlertEvent) -> Result<(), LedgerError> {
    outbox.record(alert.id.aggregate_id(), ALERT_AGGREGATE, alert.version(), event)
}

fn close_in(
    tx: &mut dyn LedgerTx,
    firm_id: FirmId,
    alert_id: AlertId,
    reason: ClosureReason,
    outbox: &mut Outbox,
) -> Result<Alert, LedgerError> {
    let mut alert = tx
        .alert(firm_id, alert_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("alert {alert_id}")))?;
    let expected = ExpectedVersion::Exact(alert.version());
    let event = alert.close(reason, Utc::now())?;
    tx.save_alert(&alert, expected)?;
    record(outbox, &alert, &event)?;
    Ok(alert)
}

/// Snapshots of every monitorable entity of the kinds covered by `scope`.
fn collect_snapshots(
    tx: &dyn LedgerTx,
    firm_id: FirmId,
    scope: AlertScope,
) -> Result<Vec<EntitySnapshot>, LedgerError> {
    let mut snapshots = Vec::new();

    if scope.includes_kind(EntityKind::Input) {
        for input in tx.inputs(firm_id)? {
            snapshots.push(EntitySnapshot::Input(InputSnapshot {
                input_id: input.id_typed().aggregate_id(),
                name: input.name().to_string(),
                unit: input.unit().to_string(),
                balance: input.balance(),
                minimum_stock: input.minimum_stock(),
                expires_on: input.expires_on(),
            }));
        }
    }

    if scope.includes_kind(EntityKind::Depot) {
        for depot in tx.depots(firm_id)? {
            snapshots.push(EntitySnapshot::Depot(DepotSnapshot {
                depot_id: depot.id.aggregate_id(),
                last_movement_at: tx.depot_last_movement(firm_id, depot.id)?,
                name: depot.name,
            }));
        }
    }

    if scope.includes_kind(EntityKind::Plot) {
        snapshots.extend(tx.plot_observations(firm_id)?.into_iter().map(EntitySnapshot::Plot));
    }

    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use agroledger_alerts::{AlertStatus, EntityRef};
    use agroledger_core::AggregateId;
    use agroledger_events::InMemoryEventBus;
    use agroledger_inventory::{DepotId, InputCategory, MovementKind};
    use rust_decimal_macros::dec;

    use crate::stock_ledger::{MovementRequest, NewInput, StockLedger};
    use crate::store::InMemoryLedgerStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn engines(
        config: &LedgerConfig,
    ) -> (
        StockLedger<Arc<InMemoryLedgerStore>, Bus>,
        AlertEngine<Arc<InMemoryLedgerStore>, Bus>,
    ) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (
            StockLedger::new(store.clone(), bus.clone()),
            AlertEngine::new(store, bus, config),
        )
    }

    fn stocked_input(
        ledger: &StockLedger<Arc<InMemoryLedgerStore>, Bus>,
        firm_id: FirmId,
        minimum: Option<rust_decimal::Decimal>,
        quantity: rust_decimal::Decimal,
    ) -> agroledger_inventory::InputId {
        let depot_id = ledger
            .register_depot(firm_id, DepotId::generate(), "Shed", true)
            .unwrap()
            .id;
        let input_id = ledger
            .create_input(
                firm_id,
                NewInput {
                    name: "Ivermectin".to_string(),
                    unit: "ml".to_string(),
                    category: InputCategory::Veterinary,
                    depot_id,
                    expires_on: None,
                    minimum_stock: minimum,
                },
            )
            .unwrap()
            .id_typed();
        ledger
            .register_movement(
                firm_id,
                MovementRequest {
                    input_id,
                    kind: MovementKind::Entry,
                    quantity,
                    depot_id,
                    reference: "opening count".to_string(),
                    remittance_id: None,
                    registered_by: None,
                },
            )
            .unwrap();
        input_id
    }

    #[test]
    fn low_stock_alert_opens_once_and_auto_resolves() {
        let (ledger, alerts) = engines(&LedgerConfig::default());
        let firm_id = FirmId::new();
        let input_id = stocked_input(&ledger, firm_id, Some(dec!(500)), dec!(100));
        let scope = AlertScope::Kind(EntityKind::Input);

        let first = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(first.created.len(), 1);
        assert_eq!(first.created[0].rule_id, "input.low_stock");

        let second = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(second, EvaluationOutcome::default());

        ledger.update_thresholds(firm_id, input_id, Some(dec!(50)), None).unwrap();
        let third = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(third.closed.len(), 1);
        assert_eq!(third.closed[0].status, AlertStatus::Completed);
        assert_eq!(third.closed[0].closure_reason, Some(ClosureReason::AutoResolved));
        assert!(alerts.pending_alerts(firm_id).unwrap().is_empty());
    }

    fn consume_all(
        ledger: &StockLedger<Arc<InMemoryLedgerStore>, Bus>,
        firm_id: FirmId,
        input_id: agroledger_inventory::InputId,
    ) {
        let input = ledger.input(firm_id, input_id).unwrap();
        ledger
            .register_movement(
                firm_id,
                MovementRequest {
                    input_id,
                    kind: MovementKind::Exit,
                    quantity: input.balance(),
                    depot_id: input.depot_id().unwrap(),
                    reference: "used up".to_string(),
                    remittance_id: None,
                    registered_by: None,
                },
            )
            .unwrap();
    }

    fn pending_rules(
        alerts: &AlertEngine<Arc<InMemoryLedgerStore>, Bus>,
        firm_id: FirmId,
    ) -> Vec<String> {
        let mut rules: Vec<String> = alerts
            .pending_alerts(firm_id)
            .unwrap()
            .into_iter()
            .map(|alert| alert.rule_id)
            .collect();
        rules.sort();
        rules
    }

    #[test]
    fn stock_alerts_close_when_stock_runs_out_and_minimum_is_removed() {
        let (ledger, alerts) = engines(&LedgerConfig::default());
        let firm_id = FirmId::new();
        let input_id = stocked_input(&ledger, firm_id, Some(dec!(500)), dec!(100));
        let expires_on = today() + chrono::Duration::days(10);
        ledger.update_thresholds(firm_id, input_id, Some(dec!(500)), Some(expires_on)).unwrap();
        let scope = AlertScope::Kind(EntityKind::Input);

        let opened = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(opened.created.len(), 2);
        assert_eq!(pending_rules(&alerts, firm_id), ["input.expiring", "input.low_stock"]);

        consume_all(&ledger, firm_id, input_id);
        let drained = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(drained.closed.len(), 1);
        assert_eq!(drained.closed[0].rule_id, "input.expiring");
        assert_eq!(drained.closed[0].closure_reason, Some(ClosureReason::AutoResolved));
        assert_eq!(pending_rules(&alerts, firm_id), ["input.low_stock"]);

        ledger.update_thresholds(firm_id, input_id, None, Some(expires_on)).unwrap();
        let unset = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(unset.closed.len(), 1);
        assert_eq!(unset.closed[0].rule_id, "input.low_stock");
        assert!(unset.created.is_empty());
        assert!(alerts.pending_alerts(firm_id).unwrap().is_empty());
    }

    #[test]
    fn expired_alert_closes_once_stock_is_gone() {
        let (ledger, alerts) = engines(&LedgerConfig::default());
        let firm_id = FirmId::new();
        let input_id = stocked_input(&ledger, firm_id, None, dec!(40));
        let yesterday = today() - chrono::Duration::days(1);
        ledger.update_thresholds(firm_id, input_id, None, Some(yesterday)).unwrap();
        let scope = AlertScope::Kind(EntityKind::Input);

        let opened = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(opened.created.len(), 1);
        assert_eq!(opened.created[0].rule_id, "input.expired");

        consume_all(&ledger, firm_id, input_id);
        let closed = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(closed.closed.len(), 1);
        assert_eq!(closed.closed[0].status, AlertStatus::Completed);
        assert!(alerts.pending_alerts(firm_id).unwrap().is_empty());
    }

    #[test]
    fn cancelled_alert_is_reopened_by_next_cycle() {
        let (ledger, alerts) = engines(&LedgerConfig::default());
        let firm_id = FirmId::new();
        stocked_input(&ledger, firm_id, Some(dec!(500)), dec!(100));

        let scope = AlertScope::Kind(EntityKind::Input);
        let created = alerts
            .evaluate_alerts_on(firm_id, scope, today())
            .unwrap()
            .created;
        let alert_id = created[0].id;
        let cancelled = alerts.cancel_alert(firm_id, alert_id).unwrap();
        assert_eq!(cancelled.status, AlertStatus::Cancelled);

        let err = alerts.resolve_alert(firm_id, alert_id).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition(_)));

        let again = alerts.evaluate_alerts_on(firm_id, scope, today()).unwrap();
        assert_eq!(again.created.len(), 1);
        assert_ne!(again.created[0].id, alert_id);
    }

    #[test]
    fn disabled_rules_are_not_evaluated() {
        let config = LedgerConfig {
            disabled_rules: vec!["input.low_stock".to_string(), "no.such_rule".to_string()],
            ..LedgerConfig::default()
        };
        let (ledger, alerts) = engines(&config);
        let firm_id = FirmId::new();
        stocked_input(&ledger, firm_id, Some(dec!(500)), dec!(100));

        assert!(!alerts.registry().is_enabled("input.low_stock"));
        let outcome = alerts.evaluate_alerts_on(firm_id, AlertScope::All, today()).unwrap();
        assert!(outcome.created.is_empty());
    }

    #[test]
    fn plot_observations_feed_plot_rules() {
        let (_, alerts) = engines(&LedgerConfig::default());
        let firm_id = FirmId::new();
        let plot_id = AggregateId::new();
        alerts
            .record_plot_observation(
                firm_id,
                PlotObservation {
                    plot_id,
                    firm_id,
                    name: "Lote 7".to_string(),
                    pasture_height_cm: Some(dec!(8)),
                    target_height_cm: Some(dec!(12)),
                    last_measured_on: Some(today()),
                    ndvi: Some(dec!(0.55)),
                    ndvi_observed_on: Some(today()),
                },
            )
            .unwrap();

        let entity = EntityRef::new(EntityKind::Plot, plot_id);
        let outcome = alerts
            .evaluate_alerts_on(firm_id, AlertScope::Entity(entity), today())
            .unwrap();
        let rules: Vec<&str> = outcome.created.iter().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(rules, vec!["plot.pasture_below_target"]);
    }

    #[test]
    fn observation_for_another_firm_is_rejected() {
        let (_, alerts) = engines(&LedgerConfig::default());
        let err = alerts
            .record_plot_observation(
                FirmId::new(),
                PlotObservation {
                    plot_id: AggregateId::new(),
                    firm_id: FirmId::new(),
                    name: "Lote 1".to_string(),
                    pasture_height_cm: None,
                    target_height_cm: None,
                    last_measured_on: None,
                    ndvi: None,
                    ndvi_observed_on: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
