use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agroledger_core::{DomainError, Entity, FirmId, aggregate_id_newtype};

aggregate_id_newtype!(
    /// Depot identifier (a plot flagged as storage location).
    DepotId
);

/// A physical storage location.
///
/// Depots are plots of the farm flagged as storage; plot management itself
/// lives outside the ledger, which only needs the identity and the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depot {
    pub id: DepotId,
    pub firm_id: FirmId,
    pub name: String,
    pub is_depot: bool,
    pub registered_at: DateTime<Utc>,
}

impl Depot {
    /// Build a depot record from a plot, rejecting plots not flagged as depot.
    pub fn from_plot(
        id: DepotId,
        firm_id: FirmId,
        name: impl Into<String>,
        is_depot: bool,
        registered_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("depot name cannot be empty"));
        }
        if !is_depot {
            return Err(DomainError::validation(format!(
                "plot {id} is not flagged as depot"
            )));
        }
        Ok(Self {
            id,
            firm_id,
            name: name.trim().to_string(),
            is_depot,
            registered_at,
        })
    }
}

impl Entity for Depot {
    type Id = DepotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plots_not_flagged_as_depot_are_rejected() {
        let err = Depot::from_plot(
            DepotId::generate(),
            FirmId::new(),
            "North paddock",
            false,
            Utc::now(),
        )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn name_is_trimmed() {
        let depot = Depot::from_plot(
            DepotId::generate(),
            FirmId::new(),
            "  Shed 1 ",
            true,
            Utc::now(),
        )
            .unwrap();
        assert_eq!(depot.name, "Shed 1");
    }
}
