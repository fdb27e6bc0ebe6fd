//! Ledger persistence
//!
//! DB-op intents emitted by the core, the ledger store seam with its memory
//! and sled backends, and the transaction pool queues.

pub mod db_ops;
pub mod ledger;
pub mod memory;
pub mod sled_store;
pub mod tx_pool;

pub use db_ops::{Assignments, Change, CustomQuery, DbOp, Filter, Row, Table};
pub use ledger::{LedgerState, LedgerStore, RoundSums, RowChange};
pub use memory::MemoryLedger;
pub use sled_store::SledLedger;
pub use tx_pool::{InnerTxQueue, ListOptions, PoolPayload, QueueEntry, QueueKind, TransactionPool};
