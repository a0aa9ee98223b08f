//! Built-in alert rules.

use rust_decimal::Decimal;

use crate::alert::AlertPriority;
use crate::rule::{AlertMessage, AlertRule, RuleContext, RuleOutcome};
use crate::snapshot::{EntityKind, EntitySnapshot};

pub const INPUT_EXPIRING: &str = "input.expiring";
pub const INPUT_EXPIRED: &str = "input.expired";
pub const INPUT_LOW_STOCK: &str = "input.low_stock";
pub const DEPOT_STALE: &str = "depot.stale";
pub const PLOT_PASTURE_BELOW_TARGET: &str = "plot.pasture_below_target";
pub const PLOT_MEASUREMENT_STALE: &str = "plot.measurement_stale";
pub const PLOT_NDVI_BELOW_THRESHOLD: &str = "plot.ndvi_below_threshold";

pub(crate) fn builtin() -> Vec<Box<dyn AlertRule>> {
    vec![
        Box::new(InputExpiring),
        Box::new(InputExpired),
        Box::new(InputLowStock),
        Box::new(DepotStale),
        Box::new(PastureBelowTarget),
        Box::new(MeasurementStale),
        Box::new(NdviBelowThreshold),
    ]
}

fn outcome(triggered: bool) -> RuleOutcome {
    if triggered {
        RuleOutcome::Triggered
    } else {
        RuleOutcome::Clear
    }
}

/// Expiration within the configured window, not yet expired, stock on hand.
#[derive(Debug, Clone, Copy)]
pub struct InputExpiring;

impl AlertRule for InputExpiring {
    fn id(&self) -> &'static str {
        INPUT_EXPIRING
    }

    fn priority(&self) -> AlertPriority {
        AlertPriority::Medium
    }

    fn applies_to(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Input
    }

    fn evaluate(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> RuleOutcome {
        let EntitySnapshot::Input(input) = snapshot else {
            return RuleOutcome::Inapplicable;
        };
        // Emptied stock or a removed expiry date resolves the alert.
        let Some(expires_on) = input.expires_on.filter(|_| input.balance > Decimal::ZERO) else {
            return RuleOutcome::Clear;
        };
        let days_left = -ctx.days_since(expires_on);
        outcome((0..=ctx.params.expiry_window_days).contains(&days_left))
    }

    fn render(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> AlertMessage {
        let (expires_on, balance, unit) = match snapshot {
            EntitySnapshot::Input(i) => (i.expires_on, i.balance, i.unit.as_str()),
            _ => (None, Decimal::ZERO, ""),
        };
        let days_left = expires_on.map(|d| -ctx.days_since(d)).unwrap_or_default();
        AlertMessage {
            title: format!("{} expires soon", snapshot.name()),
            description: format!(
                "{} {unit} expire on {} ({days_left} day(s) left)",
                balance.normalize(),
                expires_on.map(|d| d.to_string()).unwrap_or_default()
            ),
        }
    }
}

/// Expiration date in the past with stock on hand.
#[derive(Debug, Clone, Copy)]
pub struct InputExpired;

impl AlertRule for InputExpired {
    fn id(&self) -> &'static str {
        INPUT_EXPIRED
    }

    fn priority(&self) -> AlertPriority {
        AlertPriority::High
    }

    fn applies_to(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Input
    }

    fn evaluate(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> RuleOutcome {
        let EntitySnapshot::Input(input) = snapshot else {
            return RuleOutcome::Inapplicable;
        };
        match input.expires_on {
            Some(expires_on) if input.balance > Decimal::ZERO => {
                outcome(expires_on < ctx.today)
            }
            _ => RuleOutcome::Clear,
        }
    }

    fn render(&self, snapshot: &EntitySnapshot, _ctx: &RuleContext) -> AlertMessage {
        let detail = match snapshot {
            EntitySnapshot::Input(i) => format!(
                "{} {} expired on {}",
                i.balance.normalize(),
                i.unit,
                i.expires_on.map(|d| d.to_string()).unwrap_or_default()
            ),
            _ => String::new(),
        };
        AlertMessage {
            title: format!("{} has expired", snapshot.name()),
            description: detail,
        }
    }
}

/// Balance under the configured minimum stock.
#[derive(Debug, Clone, Copy)]
pub struct InputLowStock;

impl AlertRule for InputLowStock {
    fn id(&self) -> &'static str {
        INPUT_LOW_STOCK
    }

    fn priority(&self) -> AlertPriority {
        AlertPriority::High
    }

    fn applies_to(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Input
    }

    fn evaluate(&self, snapshot: &EntitySnapshot, _ctx: &RuleContext) -> RuleOutcome {
        match snapshot {
            EntitySnapshot::Input(input) => match input.minimum_stock {
                Some(minimum) => outcome(input.balance < minimum),
                None => RuleOutcome::Clear,
            },
            _ => RuleOutcome::Inapplicable,
        }
    }

    fn render(&self, snapshot: &EntitySnapshot, _ctx: &RuleContext) -> AlertMessage {
        let detail = match snapshot {
            EntitySnapshot::Input(i) => format!(
                "balance {} {unit} is below the minimum of {} {unit}",
                i.balance.normalize(),
                i.minimum_stock.unwrap_or_default().normalize(),
                unit = i.unit
            ),
            _ => String::new(),
        };
        AlertMessage {
            title: format!("Low stock: {}", snapshot.name()),
            description: detail,
        }
    }
}

/// No movement in or out of the depot for too long.
#[derive(Debug, Clone, Copy)]
pub struct DepotStale;

impl AlertRule for DepotStale {
    fn id(&self) -> &'static str {
        DEPOT_STALE
    }

    fn priority(&self) -> AlertPriority {
        AlertPriority::Low
    }

    fn applies_to(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Depot
    }

    fn evaluate(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> RuleOutcome {
        match snapshot {
            EntitySnapshot::Depot(depot) => match depot.last_movement_at {
                Some(at) => outcome(ctx.days_since(at.date_naive()) > ctx.params.depot_stale_days),
                None => RuleOutcome::Inapplicable,
            },
            _ => RuleOutcome::Inapplicable,
        }
    }

    fn render(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> AlertMessage {
        let since = match snapshot {
            EntitySnapshot::Depot(d) => d.last_movement_at.map(|at| at.date_naive()),
            _ => None,
        };
        AlertMessage {
            title: format!("No recent activity at {}", snapshot.name()),
            description: match since {
                Some(date) => format!(
                    "last movement on {date}, {} day(s) ago",
                    ctx.days_since(date)
                ),
                None => String::new(),
            },
        }
    }
}

/// Pasture height below the plot's target.
#[derive(Debug, Clone, Copy)]
pub struct PastureBelowTarget;

impl AlertRule for PastureBelowTarget {
    fn id(&self) -> &'static str {
        PLOT_PASTURE_BELOW_TARGET
    }

    fn priority(&self) -> AlertPriority {
        AlertPriority::Medium
    }

    fn applies_to(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Plot
    }

    fn evaluate(&self, snapshot: &EntitySnapshot, _ctx: &RuleContext) -> RuleOutcome {
        match snapshot {
            EntitySnapshot::Plot(plot) => match (plot.pasture_height_cm, plot.target_height_cm) {
                (Some(height), Some(target)) => outcome(height < target),
                _ => RuleOutcome::Inapplicable,
            },
            _ => RuleOutcome::Inapplicable,
        }
    }

    fn render(&self, snapshot: &EntitySnapshot, _ctx: &RuleContext) -> AlertMessage {
        let detail = match snapshot {
            EntitySnapshot::Plot(p) => format!(
                "pasture height {} cm is below the target of {} cm",
                p.pasture_height_cm.unwrap_or_default().normalize(),
                p.target_height_cm.unwrap_or_default().normalize()
            ),
            _ => String::new(),
        };
        AlertMessage {
            title: format!("Pasture below target in {}", snapshot.name()),
            description: detail,
        }
    }
}

/// Plot not measured for too long.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementStale;

impl AlertRule for MeasurementStale {
    fn id(&self) -> &'static str {
        PLOT_MEASUREMENT_STALE
    }

    fn priority(&self) -> AlertPriority {
        AlertPriority::Low
    }

    fn applies_to(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Plot
    }

    fn evaluate(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> RuleOutcome {
        match snapshot {
            EntitySnapshot::Plot(plot) => match plot.last_measured_on {
                Some(date) => outcome(ctx.days_since(date) > ctx.params.measurement_stale_days),
                None => RuleOutcome::Inapplicable,
            },
            _ => RuleOutcome::Inapplicable,
        }
    }

    fn render(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> AlertMessage {
        let last = match snapshot {
            EntitySnapshot::Plot(p) => p.last_measured_on,
            _ => None,
        };
        AlertMessage {
            title: format!("{} needs a new measurement", snapshot.name()),
            description: match last {
                Some(date) => format!(
                    "last measured on {date}, {} day(s) ago",
                    ctx.days_since(date)
                ),
                None => String::new(),
            },
        }
    }
}

/// Latest vegetation index under the configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct NdviBelowThreshold;

impl AlertRule for NdviBelowThreshold {
    fn id(&self) -> &'static str {
        PLOT_NDVI_BELOW_THRESHOLD
    }

    fn priority(&self) -> AlertPriority {
        AlertPriority::Medium
    }

    fn applies_to(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Plot
    }

    fn evaluate(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> RuleOutcome {
        match snapshot {
            EntitySnapshot::Plot(plot) => match plot.ndvi {
                Some(ndvi) => outcome(ndvi < ctx.params.ndvi_threshold),
                None => RuleOutcome::Inapplicable,
            },
            _ => RuleOutcome::Inapplicable,
        }
    }

    fn render(&self, snapshot: &EntitySnapshot, ctx: &RuleContext) -> AlertMessage {
        let detail = match snapshot {
            EntitySnapshot::Plot(p) => format!(
                "NDVI {} (observed {}) is below {}",
                p.ndvi.unwrap_or_default().normalize(),
                p.ndvi_observed_on
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "on an unknown date".to_string()),
                ctx.params.ndvi_threshold.normalize()
            ),
            _ => String::new(),
        };
        AlertMessage {
            title: format!("Low vegetation index in {}", snapshot.name()),
            description: detail,
        }
    }
}
