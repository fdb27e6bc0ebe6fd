//! Consensus core
//!
//! Accounts, transactions and blocks, their canonical byte layouts, block
//! verification and the orchestrator that applies blocks to the ledger.

pub mod account;
pub mod block;
pub mod block_reward;
pub mod chain;
pub mod codec;
pub mod fee_schedule;
pub mod transaction;
pub mod tx_types;
pub mod verify;

pub use account::{merge_balance_diff, Account, RoundRef};
pub use block::{Block, BlockLogic, RawBlock, BLOCK_VERSION};
pub use block_reward::BlockReward;
pub use chain::{Chain, ChainStatus, SharedChain};
pub use fee_schedule::FeeSchedule;
pub use transaction::{
    DelegateAsset, MultisignatureAsset, RawTransaction, SecondSignatureAsset, Transaction,
    TransactionAsset, TransactionLogic,
};
pub use tx_types::{TransactionKind, TransactionRegistry, TransactionType, TxContext};
pub use verify::{
    notify_fork, BlockVerifier, ForkReporter, ForkType, LogForkReporter, VerificationResult,
    VerifyFilter,
};
