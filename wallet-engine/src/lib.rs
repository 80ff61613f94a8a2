//! Wallet engine
//!
//! Client balances, their transaction ledger and the staff audit trail.
//! Balances change only through [`mutator::BalanceMutator`], which locks the
//! client row and commits the balance update, one audit entry and one ledger
//! entry as a single unit of work.

pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod memory_store;
pub mod metrics;
pub mod models;
pub mod mutator;
pub mod security_middleware;
pub mod services;

pub use config::Config;
pub use errors::{ErrorKind, Result, WalletError};
pub use ledger::{LedgerStore, LedgerTx};
pub use mutator::{AdjustBalanceCommand, BalanceMutator};
