//! Configuration loading and representation.
//!
//! Values come from `AGROLEDGER_*` environment variables. Missing variables
//! use defaults; unparsable ones are logged and also fall back to defaults.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use agroledger_alerts::RuleParams;

pub const EXPIRY_WINDOW_DAYS: &str = "AGROLEDGER_EXPIRY_WINDOW_DAYS";
pub const DEPOT_STALE_DAYS: &str = "AGROLEDGER_DEPOT_STALE_DAYS";
pub const MEASUREMENT_STALE_DAYS: &str = "AGROLEDGER_MEASUREMENT_STALE_DAYS";
pub const NDVI_THRESHOLD: &str = "AGROLEDGER_NDVI_THRESHOLD";
pub const DISABLED_RULES: &str = "AGROLEDGER_DISABLED_RULES";
pub const SWEEP_INTERVAL_SECS: &str = "AGROLEDGER_SWEEP_INTERVAL_SECS";
pub const SWEEP_MAX_RETRIES: &str = "AGROLEDGER_SWEEP_MAX_RETRIES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub rules: RuleParams,
    /// Rule ids excluded from evaluation.
    pub disabled_rules: Vec<String>,
    pub sweep_interval: Duration,
    pub sweep_max_retries: u32,
    pub sweep_base_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rules: RuleParams::default(),
            disabled_rules: Vec::new(),
            sweep_interval: Duration::from_secs(3600),
            sweep_max_retries: 5,
            sweep_base_backoff: Duration::from_millis(250),
        }
    }
}

impl LedgerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let rules = RuleParams {
            expiry_window_days: parse_or(
                &lookup,
                EXPIRY_WINDOW_DAYS,
                defaults.rules.expiry_window_days,
                |v: &i64| *v >= 0,
            ),
            depot_stale_days: parse_or(
                &lookup,
                DEPOT_STALE_DAYS,
                defaults.rules.depot_stale_days,
                |v: &i64| *v > 0,
            ),
            measurement_stale_days: parse_or(
                &lookup,
                MEASUREMENT_STALE_DAYS,
                defaults.rules.measurement_stale_days,
                |v: &i64| *v > 0,
            ),
            ndvi_threshold: parse_or(
                &lookup,
                NDVI_THRESHOLD,
                defaults.rules.ndvi_threshold,
                |v: &Decimal| *v >= Decimal::NEGATIVE_ONE && *v <= Decimal::ONE,
            ),
        };

        let disabled_rules = lookup(DISABLED_RULES)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let interval_secs = parse_or(
            &lookup,
            SWEEP_INTERVAL_SECS,
            defaults.sweep_interval.as_secs(),
            |v: &u64| *v > 0,
        );

        Self {
            rules,
            disabled_rules,
            sweep_interval: Duration::from_secs(interval_secs),
            sweep_max_retries: parse_or(
                &lookup,
                SWEEP_MAX_RETRIES,
                defaults.sweep_max_retries,
                |_: &u32| true,
            ),
            sweep_base_backoff: defaults.sweep_base_backoff,
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + core::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!(
                key,
                value = %raw,
                default = ?default,
                "invalid configuration value; using default"
            );
            default
        }
    }
}
