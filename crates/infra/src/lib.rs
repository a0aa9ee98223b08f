//! Infrastructure layer: ledger store, engines, config, background workers.
//!
//! The engines run domain decisions inside [`store::LedgerStore`] transactions
//! and publish the resulting events once the transaction has committed.

pub mod alerting;
pub mod config;
pub mod error;
pub mod publish;
pub mod reception;
pub mod stock_ledger;
pub mod store;
pub mod workers;


pub use alerting::{AlertEngine, EvaluationOutcome};
pub use config::LedgerConfig;
pub use error::{LedgerError, StoreError};
pub use reception::{
    InputOverrides, ItemInput, ItemReceipt, NewRemittance, NewRemittanceLine,
    PendingInputCreation, ReceiveOutcome, ReceptionEngine,
};
pub use stock_ledger::{BalanceCheck, MovementRequest, NewInput, StockLedger};
pub use store::{InMemoryLedgerStore, LedgerStore, LedgerTx};
pub use workers::{AlertSweeper, AlertSweeperHandle, SweepTarget};
