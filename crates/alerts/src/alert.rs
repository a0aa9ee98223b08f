use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agroledger_core::{AggregateRoot, DomainError, DomainResult, FirmId, aggregate_id_newtype};
use agroledger_events::Event;

use crate::rule::AlertMessage;
use crate::snapshot::EntityRef;

aggregate_id_newtype!(
    /// Alert identifier.
    AlertId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Why an alert left the pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureReason {
    /// The rule evaluated to `Clear` for the entity.
    AutoResolved,
    /// A user marked the alert as handled.
    Resolved,
    /// A user dismissed this instance.
    Cancelled,
}

impl ClosureReason {
    fn target_status(&self) -> AlertStatus {
        match self {
            ClosureReason::AutoResolved | ClosureReason::Resolved => AlertStatus::Completed,
            ClosureReason::Cancelled => AlertStatus::Cancelled,
        }
    }
}

/// Operational alert derived from one rule on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub firm_id: FirmId,
    pub entity: EntityRef,
    pub rule_id: String,
    pub priority: AlertPriority,
    pub status: AlertStatus,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closure_reason: Option<ClosureReason>,
    pub version: u64,
}

impl Alert {
    /// Open a new pending alert, returning it with its creation event.
    pub fn raise(
        id: AlertId,
        firm_id: FirmId,
        entity: EntityRef,
        rule_id: impl Into<String>,
        priority: AlertPriority,
        message: AlertMessage,
        at: DateTime<Utc>,
    ) -> (Self, AlertEvent) {
        let alert = Self {
            id,
            firm_id,
            entity,
            rule_id: rule_id.into(),
            priority,
            status: AlertStatus::Pending,
            title: message.title,
            description: message.description,
            created_at: at,
            closed_at: None,
            closure_reason: None,
            version: 1,
        };
        let event = AlertEvent::AlertRaised(AlertRaised {
            firm_id,
            alert_id: id,
            entity,
            rule_id: alert.rule_id.clone(),
            priority,
            title: alert.title.clone(),
            occurred_at: at,
        });
        (alert, event)
    }

    pub fn is_pending(&self) -> bool {
        self.status == AlertStatus::Pending
    }

    /// Leave the pending state. Only pending alerts can be closed.
    pub fn close(&mut self, reason: ClosureReason, at: DateTime<Utc>) -> DomainResult<AlertEvent> {
        if !self.is_pending() {
            return Err(DomainError::invalid_transition(format!(
                "alert {} ({}) is {:?}; only pending alerts can be closed",
                self.id, self.rule_id, self.status
            )));
        }
        self.status = reason.target_status();
        self.closed_at = Some(at);
        self.closure_reason = Some(reason);
        self.version += 1;

        Ok(AlertEvent::AlertClosed(AlertClosed {
            firm_id: self.firm_id,
            alert_id: self.id,
            entity: self.entity,
            rule_id: self.rule_id.clone(),
            status: self.status,
            reason,
            occurred_at: at,
        }))
    }
}

impl AggregateRoot for Alert {
    type Id = AlertId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRaised {
    pub firm_id: FirmId,
    pub alert_id: AlertId,
    pub entity: EntityRef,
    pub rule_id: String,
    pub priority: AlertPriority,
    pub title: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertClosed {
    pub firm_id: FirmId,
    pub alert_id: AlertId,
    pub entity: EntityRef,
    pub rule_id: String,
    pub status: AlertStatus,
    pub reason: ClosureReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertEvent {
    AlertRaised(AlertRaised),
    AlertClosed(AlertClosed),
}

impl Event for AlertEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AlertEvent::AlertRaised(_) => "alerts.alert.raised",
            AlertEvent::AlertClosed(_) => "alerts.alert.closed",
        }
    }

    fn firm_id(&self) -> FirmId {
        match self {
            AlertEvent::AlertRaised(e) => e.firm_id,
            AlertEvent::AlertClosed(e) => e.firm_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AlertEvent::AlertRaised(e) => e.occurred_at,
            AlertEvent::AlertClosed(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::EntityKind;
    use agroledger_core::AggregateId;

    fn raised() -> Alert {
        let (alert, _) = Alert::raise(
            AlertId::generate(),
            FirmId::new(),
            EntityRef::new(EntityKind::Input, AggregateId::new()),
            "input.low_stock",
            AlertPriority::High,
            AlertMessage {
                title: "Low stock: Urea".to_string(),
                description: "balance 3 kg is below the minimum of 10 kg".to_string(),
            },
            Utc::now(),
        );
        alert
    }

    #[test]
    fn cancel_and_resolve_are_terminal() {
        let mut alert = raised();
        let event = alert.close(ClosureReason::Cancelled, Utc::now()).unwrap();
        assert_eq!(event.event_type(), "alerts.alert.closed");
        assert_eq!(alert.status, AlertStatus::Cancelled);
        assert_eq!(alert.version(), 2);

        let err = alert.close(ClosureReason::Resolved, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn auto_resolution_completes_the_alert() {
        let mut alert = raised();
        alert.close(ClosureReason::AutoResolved, Utc::now()).unwrap();
        assert_eq!(alert.status, AlertStatus::Completed);
        assert_eq!(alert.closure_reason, Some(ClosureReason::AutoResolved));
        assert!(alert.closed_at.is_some());
    }
}
