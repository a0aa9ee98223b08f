use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agroledger_core::{AggregateId, DomainError, DomainResult, FirmId};

/// Kind of monitorable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Input,
    Depot,
    Plot,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Input => "input",
            EntityKind::Depot => "depot",
            EntityKind::Plot => "plot",
        }
    }
}

/// Reference to the entity an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: AggregateId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: AggregateId) -> Self {
        Self { kind, id }
    }
}

impl core::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Point-in-time view of an input, as seen by alert rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub input_id: AggregateId,
    pub name: String,
    pub unit: String,
    pub balance: Decimal,
    pub minimum_stock: Option<Decimal>,
    pub expires_on: Option<NaiveDate>,
}

/// Point-in-time view of a depot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotSnapshot {
    pub depot_id: AggregateId,
    pub name: String,
    /// Most recent movement touching the depot (as source or destination).
    pub last_movement_at: Option<DateTime<Utc>>,
}

/// Latest measured state of a (non-depot) plot.
///
/// Fed by external collaborators (field measurements, satellite imagery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotObservation {
    pub plot_id: AggregateId,
    pub firm_id: FirmId,
    pub name: String,
    pub pasture_height_cm: Option<Decimal>,
    pub target_height_cm: Option<Decimal>,
    pub last_measured_on: Option<NaiveDate>,
    pub ndvi: Option<Decimal>,
    pub ndvi_observed_on: Option<NaiveDate>,
}

impl PlotObservation {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("plot name cannot be empty"));
        }
        for (label, value) in [
            ("pasture height", self.pasture_height_cm),
            ("target height", self.target_height_cm),
        ] {
            if value.is_some_and(|v| v < Decimal::ZERO) {
                return Err(DomainError::validation(format!("{label} cannot be negative")));
            }
        }
        if let Some(ndvi) = self.ndvi {
            if ndvi < Decimal::NEGATIVE_ONE || ndvi > Decimal::ONE {
                return Err(DomainError::validation(format!(
                    "NDVI must lie within [-1, 1], got {ndvi}"
                )));
            }
        }
        Ok(())
    }
}

/// Entity state handed to the rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitySnapshot {
    Input(InputSnapshot),
    Depot(DepotSnapshot),
    Plot(PlotObservation),
}

impl EntitySnapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySnapshot::Input(_) => EntityKind::Input,
            EntitySnapshot::Depot(_) => EntityKind::Depot,
            EntitySnapshot::Plot(_) => EntityKind::Plot,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        let id = match self {
            EntitySnapshot::Input(s) => s.input_id,
            EntitySnapshot::Depot(s) => s.depot_id,
            EntitySnapshot::Plot(s) => s.plot_id,
        };
        EntityRef::new(self.kind(), id)
    }

    pub fn name(&self) -> &str {
        match self {
            EntitySnapshot::Input(s) => &s.name,
            EntitySnapshot::Depot(s) => &s.name,
            EntitySnapshot::Plot(s) => &s.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn observation() -> PlotObservation {
        PlotObservation {
            plot_id: AggregateId::new(),
            firm_id: FirmId::new(),
            name: "Lote 7".to_string(),
            pasture_height_cm: Some(dec!(12)),
            target_height_cm: Some(dec!(15)),
            last_measured_on: None,
            ndvi: Some(dec!(0.42)),
            ndvi_observed_on: None,
        }
    }

    #[test]
    fn ndvi_outside_unit_range_is_rejected() {
        let mut obs = observation();
        obs.ndvi = Some(dec!(1.2));
        assert!(matches!(obs.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn negative_heights_are_rejected() {
        let mut obs = observation();
        obs.target_height_cm = Some(dec!(-1));
        assert!(obs.validate().is_err());
        assert!(observation().validate().is_ok());
    }
}
