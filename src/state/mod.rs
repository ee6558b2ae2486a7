//! Panel-owned state
//!
//! Handles:
//! - UTXO identity and per-party UTXO sets
//! - The transaction log
//! - Per-party error records

mod errors;
mod log;
mod utxo;

pub use errors::{ErrorBoard, OperationKind, PartyErrorRecord};
pub use log::{TransactionKind, TransactionLog, TransactionLogEntry, TransactionStatus};
pub use utxo::{Utxo, UtxoRef, UtxoSet};
