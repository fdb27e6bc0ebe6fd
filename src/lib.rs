//! # Delegate Chain
//!
//! Consensus core of a delegated-proof-of-stake ledger node.
//!
//! ## Layout
//! - `utils/`: crypto adapter (Ed25519, SHA-256, ids and addresses) and byte codec primitives
//! - `core/`: transactions and their type registry, blocks, verification and the `Chain` orchestrator
//! - `consensus/`: delegate lists, forging slots and round settlement
//! - `storage/`: DB-op intents, ledger stores (memory and sled) and the transaction pool
//! - `config/`: consensus constants and node settings
//! - `cli/`: argument parsing for the binary
//!
//! The core never performs I/O itself. Applying a block produces an ordered
//! list of [`storage::DbOp`]s that a [`storage::LedgerStore`] executes as one
//! atomic batch.

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::{Constants, Settings, GLOBAL_CONFIG};
pub use core::{
    Account, Block, BlockLogic, BlockVerifier, Chain, ForkReporter, ForkType, RawBlock,
    RawTransaction, SharedChain, Transaction, TransactionLogic, TransactionRegistry,
    VerificationResult,
};
pub use error::{ChainError, Result};
pub use storage::{DbOp, LedgerStore, MemoryLedger, SledLedger, TransactionPool};
pub use utils::{current_timestamp, derive_address, sha256_digest, verify_signature, Keypair};
