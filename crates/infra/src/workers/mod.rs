//! Background workers.

pub mod alert_sweeper;

pub use alert_sweeper::{AlertSweeper, AlertSweeperHandle, MIN_SWEEP_INTERVAL, SweepTarget};
