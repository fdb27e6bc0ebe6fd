//! Pluggable transaction kinds.
//!
//! Each kind implements [`TransactionType`]; the node registers all of them
//! once at startup and dispatches on the numeric `type` field.

pub mod delegate;
pub mod multisignature;
pub mod second_signature;
pub mod send;
pub mod vote;

pub use delegate::DelegateTransaction;
pub use multisignature::MultisignatureTransaction;
pub use second_signature::SecondSignatureTransaction;
pub use send::{OpsFilter, SendTransaction};
pub use vote::VoteTransaction;

use crate::config::{Constants, FeeMilestone};
use crate::consensus::rounds::calc_round;
use crate::core::account::Account;
use crate::core::block::Block;
use crate::core::transaction::{Transaction, TransactionAsset};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, Assignments, DbOp, Filter, Row, Table};
use crate::storage::ledger::LedgerStore;
use crate::utils::diff;
use log::debug;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionKind {
    Send = 0,
    SecondSignature = 1,
    Delegate = 2,
    Vote = 3,
    Multisignature = 4,
}

/// Ledger view handed to type handlers.
#[derive(Clone, Copy)]
pub struct TxContext<'a> {
    pub constants: &'a Constants,
    pub store: &'a dyn LedgerStore,
    /// Height of the block the transaction is checked for
    pub height: u32,
}

impl<'a> TxContext<'a> {
    pub fn new(constants: &'a Constants, store: &'a dyn LedgerStore, height: u32) -> Self {
        TxContext {
            constants,
            store,
            height,
        }
    }

    pub fn round(&self) -> u64 {
        calc_round(self.height, self.constants.active_delegates)
    }
}

pub trait TransactionType: Send + Sync {
    fn kind(&self) -> TransactionKind;

    fn calculate_min_fee(
        &self,
        tx: &Transaction,
        sender: &Account,
        fees: &FeeMilestone,
    ) -> Result<u64>;

    /// Type-specific bytes inserted into the signed payload.
    fn asset_bytes(&self, tx: &Transaction) -> Result<Vec<u8>>;

    fn verify(&self, tx: &Transaction, sender: &Account, ctx: &TxContext<'_>) -> Result<()>;

    fn apply(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>>;

    fn undo(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>>;

    fn apply_unconfirmed(
        &self,
        _tx: &Transaction,
        _sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        Ok(Vec::new())
    }

    fn undo_unconfirmed(
        &self,
        _tx: &Transaction,
        _sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        Ok(Vec::new())
    }

    fn object_normalize(&self, tx: Transaction, _constants: &Constants) -> Result<Transaction> {
        Ok(tx)
    }

    fn db_save(&self, _tx: &Transaction) -> Result<Option<DbOp>> {
        Ok(None)
    }

    /// Table holding the asset rows of this kind, if any.
    fn asset_table(&self) -> Option<Table> {
        None
    }

    fn asset_from_row(&self, _row: &Row) -> Result<Option<TransactionAsset>> {
        Ok(None)
    }

    /// Ids of transactions that clash with an earlier one of the same kind.
    /// `txs` holds only this kind, in block order.
    fn find_conflicts(&self, _txs: &[&Transaction]) -> Vec<String> {
        Vec::new()
    }

    /// Whether enough co-signatures were collected for confirmation.
    fn ready(&self, tx: &Transaction, sender: &Account) -> bool {
        if !sender.is_multisignature() {
            return true;
        }
        tx.signatures().len() >= usize::from(sender.multimin)
    }
}

pub struct TransactionRegistry {
    types: HashMap<u8, Box<dyn TransactionType>>,
}

impl TransactionRegistry {
    pub fn new() -> TransactionRegistry {
        TransactionRegistry {
            types: HashMap::new(),
        }
    }

    /// Registry with the five built-in kinds.
    pub fn with_defaults() -> TransactionRegistry {
        let mut registry = TransactionRegistry::new();
        let defaults: Vec<Box<dyn TransactionType>> = vec![
            Box::new(SendTransaction::new()),
            Box::new(SecondSignatureTransaction),
            Box::new(DelegateTransaction),
            Box::new(VoteTransaction),
            Box::new(MultisignatureTransaction),
        ];
        for handler in defaults {
            registry.types.insert(handler.kind() as u8, handler);
        }
        registry
    }

    pub fn register(&mut self, handler: Box<dyn TransactionType>) -> Result<()> {
        let key = handler.kind() as u8;
        if self.types.contains_key(&key) {
            return Err(ChainError::Config(format!(
                "Transaction type {key} is already registered"
            )));
        }
        debug!("Registered transaction type {:?}", handler.kind());
        self.types.insert(key, handler);
        Ok(())
    }

    /// Swaps the handler of an already registered kind.
    pub fn replace(&mut self, handler: Box<dyn TransactionType>) {
        self.types.insert(handler.kind() as u8, handler);
    }

    pub fn get(&self, tx_type: u8) -> Option<&dyn TransactionType> {
        self.types.get(&tx_type).map(|handler| handler.as_ref())
    }

    pub fn is_registered(&self, tx_type: u8) -> bool {
        self.types.contains_key(&tx_type)
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub(crate) fn account_update(address: &str, set: Assignments) -> DbOp {
    DbOp::update(Table::Accounts, Filter::eq("address", address), set)
}

/// Inserts and removes `accountId -> dependentId` rows according to a
/// `+key`/`-key` diff.
pub(crate) fn relation_ops(table: Table, address: &str, changes: &[String]) -> Vec<DbOp> {
    let mut ops = Vec::new();
    let removed = diff::removed(changes);
    if !removed.is_empty() {
        ops.push(DbOp::remove(
            table,
            Filter::eq("accountId", address).and_in("dependentId", removed),
        ));
    }
    let added = diff::added(changes);
    if !added.is_empty() {
        ops.push(DbOp::BulkCreate {
            table,
            values: added
                .into_iter()
                .map(|key| row([("accountId", address.to_string()), ("dependentId", key)]))
                .collect(),
        });
    }
    ops
}

/// Transactions whose sender already appears earlier in `txs`.
pub(crate) fn repeated_senders(txs: &[&Transaction]) -> Vec<String> {
    let mut seen = HashSet::new();
    txs.iter()
        .filter(|tx| !seen.insert(tx.sender_id.as_str()))
        .map(|tx| tx.id.clone())
        .collect()
}

pub(crate) fn invalid_asset(tx: &Transaction) -> ChainError {
    ChainError::schema("asset", format!("Invalid transaction asset for type {}", tx.tx_type))
}
