//! Block application orchestrator
//!
//! `Chain` owns the authoritative tip, the ledger store and the transaction
//! pool. Every mutation goes through `&mut self`; wrap it in a
//! [`SharedChain`] to get one writer and many readers across threads.

use crate::config::Constants;
use crate::consensus::{RoundsLogic, Slots};
use crate::core::account::Account;
use crate::core::block::{Block, BlockLogic, RawBlock};
use crate::core::transaction::{RawTransaction, Transaction, TransactionAsset, TransactionLogic};
use crate::core::tx_types::{TransactionKind, TransactionRegistry, TxContext};
use crate::core::verify::{notify_fork, BlockVerifier, ForkReporter, ForkType};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, DbOp, Filter, Table};
use crate::storage::ledger::LedgerStore;
use crate::storage::tx_pool::{PoolPayload, QueueKind, TransactionPool};
use crate::utils::{current_timestamp, verify_signature, Keypair};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type SharedChain<S> = Arc<RwLock<Chain<S>>>;

const SECONDS_PER_HOUR: i64 = 3600;

/// Snapshot of the node state for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    pub height: u32,
    pub last_block_id: Option<String>,
    pub last_block_timestamp: Option<i32>,
    pub unconfirmed: usize,
    pub pending: usize,
    pub queued: usize,
}

pub struct Chain<S: LedgerStore> {
    store: S,
    constants: Arc<Constants>,
    tx_logic: Arc<TransactionLogic>,
    block_logic: Arc<BlockLogic>,
    verifier: BlockVerifier,
    rounds: RoundsLogic,
    pool: TransactionPool,
    slots: Slots,
    fork_reporter: Arc<dyn ForkReporter>,
    last_block: Option<Block>,
}

impl<S: LedgerStore> Chain<S> {
    pub fn new(
        store: S,
        constants: Arc<Constants>,
        registry: TransactionRegistry,
        fork_reporter: Arc<dyn ForkReporter>,
    ) -> Result<Chain<S>> {
        constants.validate()?;
        let tx_logic = Arc::new(TransactionLogic::new(constants.clone(), registry));
        let block_logic = Arc::new(BlockLogic::new(constants.clone(), tx_logic.clone()));
        let mut verifier =
            BlockVerifier::new(block_logic.clone(), constants.clone(), fork_reporter.clone());
        verifier.on_blockchain_ready(&store)?;

        let mut chain = Chain {
            rounds: RoundsLogic::new(constants.clone()),
            pool: TransactionPool::new(constants.max_txs_per_queue),
            slots: Slots::new(&constants),
            store,
            constants,
            tx_logic,
            block_logic,
            verifier,
            fork_reporter,
            last_block: None,
        };
        chain.last_block = match chain.store.last_block()? {
            Some(block) => Some(chain.load_block_transactions(block)?),
            None => None,
        };
        if let Some(last) = &chain.last_block {
            info!("Loaded chain at height {} (block {})", last.height, last.id);
        }
        Ok(chain)
    }

    pub fn into_shared(self) -> SharedChain<S> {
        Arc::new(RwLock::new(self))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    pub fn transaction_logic(&self) -> &TransactionLogic {
        &self.tx_logic
    }

    pub fn block_logic(&self) -> &BlockLogic {
        &self.block_logic
    }

    pub fn verifier(&self) -> &BlockVerifier {
        &self.verifier
    }

    pub fn verifier_mut(&mut self) -> &mut BlockVerifier {
        &mut self.verifier
    }

    pub fn rounds(&self) -> &RoundsLogic {
        &self.rounds
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.last_block.as_ref()
    }

    pub fn height(&self) -> u32 {
        self.last_block.as_ref().map_or(0, |block| block.height)
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus {
            height: self.height(),
            last_block_id: self.last_block.as_ref().map(|b| b.id.clone()),
            last_block_timestamp: self.last_block.as_ref().map(|b| b.timestamp),
            unconfirmed: self.pool.unconfirmed.count(),
            pending: self.pool.pending.count(),
            queued: self.pool.queued.count(),
        }
    }

    pub fn get_account(&self, address: &str) -> Result<Option<Account>> {
        self.store.find_account(&Filter::eq("address", address))
    }

    /// Seconds since the chain epoch, from the wall clock.
    pub fn epoch_now(&self) -> Result<i64> {
        Ok(self.slots.epoch_time(current_timestamp()?))
    }

    fn tip(&self) -> Result<&Block> {
        self.last_block
            .as_ref()
            .ok_or_else(|| ChainError::InvalidBlock("Chain has no genesis block".to_string()))
    }

    /// Attaches the stored transactions of `block` in their recorded order.
    pub fn load_block_transactions(&self, mut block: Block) -> Result<Block> {
        let rows = self
            .store
            .find_rows(Table::Transactions, &Filter::eq("blockId", block.id.as_str()))?;
        let mut indexed = Vec::with_capacity(rows.len());
        for row in &rows {
            let index = row.get("blockIndex").and_then(|v| v.as_u64()).unwrap_or(0);
            indexed.push((index, TransactionLogic::from_row(row)?));
        }
        indexed.sort_by_key(|(index, _)| *index);
        let mut transactions: Vec<Transaction> = indexed.into_iter().map(|(_, tx)| tx).collect();
        self.tx_logic.attach_assets(&mut transactions, &self.store)?;
        block.transactions = transactions;
        Ok(block)
    }

    pub fn find_block(&self, id: &str) -> Result<Option<Block>> {
        match self.store.find_block_by_id(id)? {
            Some(block) => Ok(Some(self.load_block_transactions(block)?)),
            None => Ok(None),
        }
    }

    /// Applies the genesis block to an empty chain. Re-applying the block the
    /// chain already starts with is a no-op.
    pub fn apply_genesis(&mut self, block: Block) -> Result<()> {
        if let Some(last) = &self.last_block {
            if self.store.find_block_at_height(1)?.map(|g| g.id) == Some(block.id.clone()) {
                debug!("Genesis block {} already applied", block.id);
                return Ok(());
            }
            return Err(ChainError::InvalidBlock(format!(
                "Chain already holds blocks up to height {}",
                last.height
            )));
        }
        let block = self.block_logic.object_normalize(RawBlock::from(&block))?;
        let result = self.verifier.verify_genesis(&block);
        if !result.verified {
            return Err(ChainError::Verification(result.errors));
        }
        info!(
            "Applying genesis block {} with {} transactions",
            block.id, block.number_of_transactions
        );
        self.apply_block(block)
    }

    /// Verifies `block` against the tip and applies it.
    pub fn process_block(&mut self, mut block: Block) -> Result<Block> {
        let last = self.tip()?.clone();
        block.height = last.height + 1;
        let block = self.block_logic.object_normalize(RawBlock::from(&block))?;

        let result = self.verifier.verify_block(&block, &last);
        if !result.verified {
            warn!(
                "Block {} failed verification: {}",
                block.id,
                result.errors.join(", ")
            );
            return Err(ChainError::Verification(result.errors));
        }

        if self.store.find_block_by_id(&block.id)?.is_some() {
            return Err(ChainError::InvalidBlock(format!(
                "Block {} already exists",
                block.id
            )));
        }

        self.check_confirmed(&block)?;

        let conflicts = self.tx_logic.find_conflicts(&block.transactions)?;
        if !conflicts.is_empty() {
            return Err(ChainError::InvalidBlock(format!(
                "Block contains conflicting transactions: {}",
                conflicts.join(", ")
            )));
        }

        let ctx = TxContext::new(&self.constants, &self.store, block.height);
        for tx in &block.transactions {
            let sender = self
                .store
                .find_account(&Filter::eq("address", tx.sender_id.as_str()))?;
            self.tx_logic.verify(tx, sender.as_ref(), &ctx)?;
        }

        self.apply_block(block.clone())?;
        Ok(block)
    }

    /// Rejects blocks carrying transactions that are already stored, dropping
    /// any pooled copies of them.
    fn check_confirmed(&mut self, block: &Block) -> Result<()> {
        if block.transactions.is_empty() {
            return Ok(());
        }
        let ids = block.transactions.iter().map(|tx| tx.id.as_str());
        let confirmed = self
            .store
            .find_rows(Table::Transactions, &Filter::is_in("id", ids))?;
        if confirmed.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = confirmed
            .iter()
            .filter_map(|row| row.get("id")?.as_str().map(str::to_string))
            .collect();
        for id in &ids {
            self.discard(id)?;
        }
        notify_fork(self.fork_reporter.as_ref(), block, ForkType::TxAlreadyConfirmed);
        Err(ChainError::InvalidBlock(format!(
            "Transactions already confirmed: {}",
            ids.join(", ")
        )))
    }

    /// Commits `block` in one atomic batch and resyncs the pool on top of it.
    pub fn apply_block(&mut self, block: Block) -> Result<()> {
        let pooled = self.pool.unconfirmed_list(None);
        let ops = {
            let ctx = TxContext::new(&self.constants, &self.store, block.height);
            let allow_missing = block.height == 1;
            let mut cache: HashMap<String, Account> = HashMap::new();
            let mut ops = Vec::new();

            for tx in pooled.iter().rev() {
                let sender = cached_sender(&mut cache, &self.store, tx, false, &mut ops)?;
                ops.extend(self.tx_logic.undo_unconfirmed(tx, sender, &ctx)?);
            }
            for tx in &block.transactions {
                let sender = cached_sender(&mut cache, &self.store, tx, allow_missing, &mut ops)?;
                ops.extend(self.tx_logic.apply_unconfirmed(tx, sender, &ctx)?);
                ops.extend(self.tx_logic.apply(tx, &block, sender, &ctx)?);
            }

            ops.push(self.block_logic.db_save(&block)?);
            ops.extend(
                self.tx_logic
                    .db_save(&block.transactions, &block.id, block.height)?,
            );
            ops.extend(self.rounds.tick(&block, &self.store)?);
            ops
        };
        self.store.apply_ops(&ops)?;
        info!(
            "Applied block {} at height {} ({} transactions)",
            block.id, block.height, block.number_of_transactions
        );

        for tx in &block.transactions {
            self.pool.remove(&tx.id);
        }
        for tx in pooled {
            if let Ok(payload) = self.pool.unconfirmed.get_payload(&tx.id).copied() {
                self.pool.unconfirmed.remove(&tx.id);
                self.pool.queued.add(tx, payload);
            }
        }
        self.verifier.on_new_block(&block);
        self.last_block = Some(block);
        self.resync_pool();
        Ok(())
    }

    /// Re-admits queued transactions after a committed block change. The block
    /// stands even when the store rejects an admission.
    fn resync_pool(&mut self) {
        if let Err(e) = self.process_queue() {
            warn!("Failed to re-admit queued transactions: {e}");
        }
        self.pool.reindex();
    }

    /// Reverts the tip block and returns it. Its transactions go back into the
    /// pool.
    pub fn delete_last_block(&mut self) -> Result<Block> {
        let last = self.tip()?.clone();
        if last.height <= 1 {
            return Err(ChainError::InvalidBlock(
                "Cannot delete the genesis block".to_string(),
            ));
        }
        let previous_id = last
            .previous_block
            .clone()
            .ok_or_else(|| ChainError::InvalidBlock("Block has no previous block".to_string()))?;
        let previous = self
            .find_block(&previous_id)?
            .ok_or_else(|| ChainError::NotFound(format!("Previous block {previous_id}")))?;

        let ops = {
            let ctx = TxContext::new(&self.constants, &self.store, last.height);
            let mut cache: HashMap<String, Account> = HashMap::new();
            let mut ops = Vec::new();
            for tx in last.transactions.iter().rev() {
                let sender = cached_sender(&mut cache, &self.store, tx, false, &mut ops)?;
                ops.extend(self.tx_logic.undo(tx, &last, sender, &ctx)?);
                ops.extend(self.tx_logic.undo_unconfirmed(tx, sender, &ctx)?);
            }
            ops.extend(self.rounds.backward_tick(&last, &self.store)?);
            ops.extend(self.tx_logic.db_remove(&last.transactions));
            ops.push(DbOp::remove(
                Table::Blocks,
                Filter::eq("id", last.id.as_str()),
            ));
            ops
        };
        self.store.apply_ops(&ops)?;
        info!(
            "Deleted block {} at height {}, tip is now {}",
            last.id, last.height, previous.id
        );

        self.verifier.on_block_deleted(&last.id);
        self.last_block = Some(previous);

        let now = self.epoch_now()?;
        for tx in &last.transactions {
            if let Err(e) = self.pool.queue(tx.clone(), self.payload(now)) {
                warn!("Dropped transaction {} of deleted block: {e}", tx.id);
            }
        }
        self.resync_pool();
        Ok(last)
    }

    fn payload(&self, now: i64) -> PoolPayload {
        PoolPayload {
            received_at: now,
            timeout: self.constants.unconfirmed_timeout,
        }
    }

    /// Normalizes and queues a transaction from a client or peer, then runs
    /// the queue. `now` is epoch time.
    pub fn receive_transaction(&mut self, raw: RawTransaction, now: i64) -> Result<String> {
        let tx = self.tx_logic.object_normalize(raw)?;
        let id = tx.id.clone();
        self.enqueue(tx, now)?;
        self.process_queue()?;
        Ok(id)
    }

    /// Queues a batch, stopping at the first malformed transaction, then runs
    /// the queue once.
    pub fn receive_transactions(
        &mut self,
        raws: Vec<RawTransaction>,
        now: i64,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(raws.len());
        for raw in raws {
            let tx = self.tx_logic.object_normalize(raw)?;
            ids.push(tx.id.clone());
            self.enqueue(tx, now)?;
        }
        self.process_queue()?;
        Ok(ids)
    }

    fn enqueue(&mut self, tx: Transaction, now: i64) -> Result<()> {
        let stored = self
            .store
            .find_rows(Table::Transactions, &Filter::eq("id", tx.id.as_str()))?;
        if !stored.is_empty() {
            return Err(ChainError::tx(format!(
                "Transaction is already confirmed: {}",
                tx.id
            )));
        }
        let payload = self.payload(now);
        self.pool.queue(tx, payload)
    }

    /// Moves every queued transaction to the unconfirmed or pending queue, or
    /// drops it. Only storage failures abort the run.
    pub fn process_queue(&mut self) -> Result<()> {
        if self.last_block.is_none() {
            return Ok(());
        }
        for tx in self.pool.queued.transactions() {
            let payload = *self.pool.queued.get_payload(&tx.id)?;
            self.pool.queued.remove(&tx.id);
            let id = tx.id.clone();
            match self.admit(tx, payload) {
                Ok(()) => {}
                Err(e @ (ChainError::Storage(_) | ChainError::Io(_))) => return Err(e),
                Err(e) => debug!("Dropped transaction {id}: {e}"),
            }
        }
        self.pool.queued.reindex();
        Ok(())
    }

    fn admit(&mut self, tx: Transaction, payload: PoolPayload) -> Result<()> {
        let height = self.height() + 1;
        let sender = self
            .store
            .find_account(&Filter::eq("address", tx.sender_id.as_str()))?;
        let ops = {
            let ctx = TxContext::new(&self.constants, &self.store, height);
            self.tx_logic.verify(&tx, sender.as_ref(), &ctx)?;
            let mut sender = sender.ok_or_else(|| ChainError::tx("Missing sender"))?;

            if !self.tx_logic.ready(&tx, &sender)? {
                let lifetime = match &tx.asset {
                    Some(TransactionAsset::Multisignature { multisignature }) => {
                        multisignature.lifetime
                    }
                    _ => sender.multilifetime,
                };
                let payload = PoolPayload {
                    timeout: i64::from(lifetime) * SECONDS_PER_HOUR,
                    ..payload
                };
                debug!("Transaction {} is waiting for signatures", tx.id);
                self.pool.pending.add(tx, payload);
                return Ok(());
            }
            self.tx_logic.apply_unconfirmed(&tx, &mut sender, &ctx)?
        };
        self.store.apply_ops(&ops)?;
        debug!("Transaction {} is unconfirmed", tx.id);
        self.pool.unconfirmed.add(tx, payload);
        Ok(())
    }

    /// Adds a member co-signature to a pending transaction and queues it once
    /// enough signatures are collected.
    pub fn add_signature(&mut self, tx_id: &str, signature: Vec<u8>) -> Result<()> {
        let tx = self.pool.pending.get(tx_id)?.clone();
        if tx.signatures().contains(&signature) {
            return Err(ChainError::tx("Signature already exists"));
        }
        let sender = self
            .get_account(&tx.sender_id)?
            .ok_or_else(|| ChainError::tx("Missing sender"))?;

        let members: Vec<Vec<u8>> = match &tx.asset {
            Some(TransactionAsset::Multisignature { multisignature })
                if tx.tx_type == TransactionKind::Multisignature as u8 =>
            {
                multisignature
                    .keysgroup
                    .iter()
                    .map(|key| hex::decode(key.trim_start_matches('+')))
                    .collect::<std::result::Result<_, _>>()?
            }
            _ => sender
                .multisignatures
                .iter()
                .map(hex::decode)
                .collect::<std::result::Result<_, _>>()?,
        };
        let hash = self.tx_logic.get_hash(&tx, true, true)?;
        if !members
            .iter()
            .any(|key| verify_signature(&hash, &signature, key))
        {
            return Err(ChainError::tx("Failed to verify signature"));
        }

        let mut signatures = tx.signatures().to_vec();
        signatures.push(signature);
        let pending = self.pool.pending.get_mut(tx_id)?;
        pending.signatures = Some(signatures);

        if self.tx_logic.ready(pending, &sender)? {
            let tx = pending.clone();
            let payload = *self.pool.pending.get_payload(tx_id)?;
            self.pool.pending.remove(tx_id);
            info!("Transaction {tx_id} collected all signatures");
            self.pool.queued.add(tx, payload);
            self.process_queue()?;
        }
        Ok(())
    }

    /// Drops expired pool entries, undoing their unconfirmed state. Returns
    /// the dropped ids.
    pub fn expire_transactions(&mut self, now: i64) -> Result<Vec<String>> {
        let expired = self.pool.expired(now);
        let mut ids = Vec::with_capacity(expired.len());
        for (kind, tx) in expired {
            if kind == QueueKind::Unconfirmed {
                self.discard(&tx.id)?;
            } else {
                self.pool.remove(&tx.id);
            }
            ids.push(tx.id);
        }
        if !ids.is_empty() {
            info!("Expired {} transactions", ids.len());
            self.pool.reindex();
        }
        Ok(ids)
    }

    /// Removes a transaction from the pool, reverting its unconfirmed state
    /// first when it was applied.
    fn discard(&mut self, id: &str) -> Result<()> {
        if self.pool.queue_of(id) != Some(QueueKind::Unconfirmed) {
            self.pool.remove(id);
            return Ok(());
        }
        let tx = self.pool.unconfirmed.get(id)?.clone();
        let mut sender = self
            .get_account(&tx.sender_id)?
            .ok_or_else(|| ChainError::tx("Missing sender"))?;
        let ops = {
            let ctx = TxContext::new(&self.constants, &self.store, self.height() + 1);
            self.tx_logic.undo_unconfirmed(&tx, &mut sender, &ctx)?
        };
        self.store.apply_ops(&ops)?;
        self.pool.remove(id);
        Ok(())
    }

    /// Forges a block from the unconfirmed pool on top of the tip and applies
    /// it. `timestamp` is epoch time.
    pub fn generate_block(&mut self, keypair: &Keypair, timestamp: i32) -> Result<Block> {
        let last = self.tip()?.clone();
        let candidates = self.pool.unconfirmed_list(None);
        let block = self
            .block_logic
            .create(keypair, timestamp, &candidates, Some(&last))?;
        info!(
            "Forged block {} at height {} with {} transactions",
            block.id, block.height, block.number_of_transactions
        );
        self.process_block(block)
    }
}

/// Sender of `tx` as tracked within one batch. Accounts are read from the
/// store on first use; missing ones are created when `allow_missing` is set.
fn cached_sender<'c>(
    cache: &'c mut HashMap<String, Account>,
    store: &dyn LedgerStore,
    tx: &Transaction,
    allow_missing: bool,
    ops: &mut Vec<DbOp>,
) -> Result<&'c mut Account> {
    match cache.entry(tx.sender_id.clone()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let account = match store.find_account(&Filter::eq("address", tx.sender_id.as_str()))? {
                Some(account) => account,
                None if allow_missing => {
                    ops.push(DbOp::Upsert {
                        table: Table::Accounts,
                        values: row([("address", tx.sender_id.as_str())]),
                    });
                    Account::new(&tx.sender_id)
                }
                None => {
                    return Err(ChainError::tx(format!(
                        "Missing sender account {}",
                        tx.sender_id
                    )))
                }
            };
            Ok(entry.insert(account))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db_ops::Row;
    use crate::storage::ledger::RoundSums;
    use crate::storage::memory::MemoryLedger;
    use crate::testnet::{self, TestNet};

    fn transfer(net: &TestNet, chain: &Chain<MemoryLedger>, amount: u64) -> RawTransaction {
        let tx = testnet::send(
            chain.transaction_logic(),
            &net.funded,
            &net.recipient.address(),
            amount,
            testnet::SEND_FEE,
        );
        RawTransaction::from(&tx)
    }

    #[test]
    fn test_genesis_is_applied_once() {
        let (mut chain, net) = testnet::memory_chain(3);
        assert_eq!(chain.height(), 1);
        chain.apply_genesis(net.genesis.clone()).unwrap();
        assert_eq!(chain.height(), 1);

        let funded = chain.get_account(&net.funded.address()).unwrap().unwrap();
        assert_eq!(funded.balance, testnet::FUNDED_BALANCE);
        assert_eq!(funded.u_balance, testnet::FUNDED_BALANCE);
        for delegate in &net.delegates {
            let account = chain.get_account(&delegate.address()).unwrap().unwrap();
            assert!(account.is_delegate);
            assert_eq!(account.vote, testnet::FUNDED_BALANCE);
        }
    }

    #[test]
    fn test_received_send_is_unconfirmed_then_forged() {
        let (mut chain, net) = testnet::memory_chain(3);
        let raw = transfer(&net, &chain, 1_000);
        let id = chain.receive_transaction(raw, 0).unwrap();
        assert_eq!(chain.pool().queue_of(&id), Some(QueueKind::Unconfirmed));

        let funded = chain.get_account(&net.funded.address()).unwrap().unwrap();
        assert_eq!(funded.balance, testnet::FUNDED_BALANCE);
        assert_eq!(funded.u_balance, testnet::FUNDED_BALANCE - 1_000 - testnet::SEND_FEE);

        let block = chain.generate_block(&net.delegates[0], 10).unwrap();
        assert_eq!(block.height, 2);
        assert_eq!(block.number_of_transactions, 1);
        assert!(!chain.pool().contains(&id));

        let funded = chain.get_account(&net.funded.address()).unwrap().unwrap();
        assert_eq!(funded.balance, funded.u_balance);
        let recipient = chain.get_account(&net.recipient.address()).unwrap().unwrap();
        assert_eq!(recipient.balance, 1_000);
    }

    #[test]
    fn test_double_spend_is_dropped_from_pool() {
        let (mut chain, net) = testnet::memory_chain(3);
        let first = transfer(&net, &chain, testnet::FUNDED_BALANCE - testnet::SEND_FEE);
        let second = transfer(&net, &chain, 5);
        let ids = chain.receive_transactions(vec![first, second], 0).unwrap();
        assert_eq!(chain.pool().queue_of(&ids[0]), Some(QueueKind::Unconfirmed));
        assert_eq!(chain.pool().queue_of(&ids[1]), None);
    }

    #[test]
    fn test_confirmed_transaction_is_rejected() {
        let (mut chain, net) = testnet::memory_chain(3);
        let raw = transfer(&net, &chain, 7);
        chain.receive_transaction(raw.clone(), 0).unwrap();
        chain.generate_block(&net.delegates[0], 10).unwrap();

        let err = chain.receive_transaction(raw, 0).unwrap_err();
        assert!(err.to_string().contains("already confirmed"));
    }

    #[test]
    fn test_delete_last_block_requeues_transactions() {
        let (mut chain, net) = testnet::memory_chain(3);
        let before = chain.get_account(&net.funded.address()).unwrap().unwrap();
        let id = chain.receive_transaction(transfer(&net, &chain, 500), 0).unwrap();
        let block = chain.generate_block(&net.delegates[0], 10).unwrap();

        let deleted = chain.delete_last_block().unwrap();
        assert_eq!(deleted.id, block.id);
        assert_eq!(chain.height(), 1);
        assert!(chain.store().find_block_by_id(&block.id).unwrap().is_none());
        assert_eq!(chain.pool().queue_of(&id), Some(QueueKind::Unconfirmed));

        let after = chain.get_account(&net.funded.address()).unwrap().unwrap();
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.u_balance, before.u_balance - 500 - testnet::SEND_FEE);
        let recipient = chain.get_account(&net.recipient.address()).unwrap().unwrap();
        assert_eq!(recipient.balance, 0);
    }

    #[test]
    fn test_genesis_cannot_be_deleted() {
        let (mut chain, _net) = testnet::memory_chain(3);
        assert!(chain.delete_last_block().is_err());
    }

    #[test]
    fn test_expired_unconfirmed_is_reverted() {
        let (mut chain, net) = testnet::memory_chain(3);
        let id = chain.receive_transaction(transfer(&net, &chain, 5), 0).unwrap();
        assert!(chain.expire_transactions(100).unwrap().is_empty());

        let timeout = chain.constants().unconfirmed_timeout;
        assert_eq!(chain.expire_transactions(timeout + 1).unwrap(), vec![id]);
        let funded = chain.get_account(&net.funded.address()).unwrap().unwrap();
        assert_eq!(funded.u_balance, funded.balance);
    }

    #[test]
    fn test_wrong_previous_block_is_reported() {
        let (mut chain, net) = testnet::memory_chain(3);
        let genesis = chain.last_block().unwrap().clone();
        chain.generate_block(&net.delegates[0], 10).unwrap();

        let stale = chain
            .block_logic()
            .create(&net.delegates[1], 20, &[], Some(&genesis))
            .unwrap();
        let err = chain.process_block(stale).unwrap_err();
        assert!(matches!(err, ChainError::Verification(ref errors)
            if errors.iter().any(|e| e.starts_with("Invalid previous block"))));
        assert_eq!(net.reporter.reports(), vec![ForkType::WrongPreviousBlock]);
    }

    /// Ledger whose writes fail while `armed` is set, except block commits.
    struct AdmissionFailingLedger {
        inner: MemoryLedger,
        armed: bool,
    }

    impl LedgerStore for AdmissionFailingLedger {
        fn apply_ops(&mut self, ops: &[DbOp]) -> Result<()> {
            let commits_block = ops.iter().any(|op| {
                matches!(
                    op,
                    DbOp::Create {
                        table: Table::Blocks,
                        ..
                    }
                )
            });
            if self.armed && !commits_block {
                return Err(ChainError::storage("disk full"));
            }
            self.inner.apply_ops(ops)
        }

        fn find_rows(&self, table: Table, filter: &Filter) -> Result<Vec<Row>> {
            self.inner.find_rows(table, filter)
        }

        fn find_accounts(&self, filter: &Filter) -> Result<Vec<Account>> {
            self.inner.find_accounts(filter)
        }

        fn find_block_by_id(&self, id: &str) -> Result<Option<Block>> {
            self.inner.find_block_by_id(id)
        }

        fn find_block_at_height(&self, height: u32) -> Result<Option<Block>> {
            self.inner.find_block_at_height(height)
        }

        fn last_block(&self) -> Result<Option<Block>> {
            self.inner.last_block()
        }

        fn last_block_ids(&self, limit: usize) -> Result<Vec<String>> {
            self.inner.last_block_ids(limit)
        }

        fn sum_round(&self, active_delegates: u32, round: u64) -> Result<RoundSums> {
            self.inner.sum_round(active_delegates, round)
        }
    }

    #[test]
    fn test_block_stands_when_requeue_fails() {
        let (seed, net) = testnet::memory_chain(3);
        let store = AdmissionFailingLedger {
            inner: seed.store().clone(),
            armed: false,
        };
        let mut chain = Chain::new(
            store,
            Arc::new(seed.constants().clone()),
            TransactionRegistry::with_defaults(),
            net.reporter.clone(),
        )
        .unwrap();
        let tx = testnet::send(
            chain.transaction_logic(),
            &net.funded,
            &net.recipient.address(),
            5,
            testnet::SEND_FEE,
        );
        let id = chain.receive_transaction(RawTransaction::from(&tx), 0).unwrap();

        let last = chain.last_block().unwrap().clone();
        let empty = chain
            .block_logic()
            .create(&net.delegates[0], 10, &[], Some(&last))
            .unwrap();
        chain.store.armed = true;
        let applied = chain.process_block(empty).unwrap();

        assert_eq!(chain.height(), 2);
        assert_eq!(chain.last_block().map(|b| b.id.clone()), Some(applied.id));
        assert!(!chain.pool().contains(&id));
    }

    #[test]
    fn test_status_reports_pool_sizes() {
        let (mut chain, net) = testnet::memory_chain(3);
        chain.receive_transaction(transfer(&net, &chain, 5), 0).unwrap();
        let status = chain.status();
        assert_eq!(status.height, 1);
        assert_eq!(status.unconfirmed, 1);
        assert_eq!(status.last_block_id, Some(net.genesis.id.clone()));
    }
}
