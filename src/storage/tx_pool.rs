//! Insertion-ordered transaction queues.
//!
//! Removal tombstones the slot so positions of the remaining entries stay
//! stable until `reindex` compacts the queue.

use crate::core::transaction::Transaction;
use crate::error::{ChainError, Result};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Bookkeeping stored next to every pooled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPayload {
    /// Epoch-relative seconds at which the node first saw the transaction
    pub received_at: i64,
    /// Seconds after `received_at` at which the entry expires
    pub timeout: i64,
}

impl PoolPayload {
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.received_at > self.timeout
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry<P> {
    pub tx: Transaction,
    pub payload: P,
}

pub type EntryFilter<'a, P> = Box<dyn Fn(&QueueEntry<P>) -> bool + 'a>;
pub type EntrySort<'a, P> = Box<dyn Fn(&QueueEntry<P>, &QueueEntry<P>) -> Ordering + 'a>;

pub struct ListOptions<'a, P> {
    pub filter: Option<EntryFilter<'a, P>>,
    pub sort: Option<EntrySort<'a, P>>,
    pub reverse: bool,
    /// `Some(0)` yields nothing
    pub limit: Option<usize>,
}

impl<P> Default for ListOptions<'_, P> {
    fn default() -> Self {
        ListOptions {
            filter: None,
            sort: None,
            reverse: false,
            limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InnerTxQueue<P> {
    transactions: Vec<Option<Transaction>>,
    index: HashMap<String, usize>,
    payload: HashMap<String, P>,
}

impl<P> Default for InnerTxQueue<P> {
    fn default() -> Self {
        InnerTxQueue {
            transactions: Vec::new(),
            index: HashMap::new(),
            payload: HashMap::new(),
        }
    }
}

impl<P: Clone> InnerTxQueue<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Tombstoned slots waiting for `reindex`.
    pub fn holes(&self) -> usize {
        self.transactions.len() - self.index.len()
    }

    /// Adding a transaction that is already queued is a no-op.
    pub fn add(&mut self, tx: Transaction, payload: P) {
        if self.has(&tx.id) {
            return;
        }
        self.index.insert(tx.id.clone(), self.transactions.len());
        self.payload.insert(tx.id.clone(), payload);
        self.transactions.push(Some(tx));
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.index.remove(id) {
            Some(slot) => {
                self.transactions[slot] = None;
                self.payload.remove(id);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Result<&Transaction> {
        self.index
            .get(id)
            .and_then(|slot| self.transactions[*slot].as_ref())
            .ok_or_else(|| ChainError::NotFound(format!("Transaction not in queue: {id}")))
    }

    pub fn get_payload(&self, id: &str) -> Result<&P> {
        self.payload
            .get(id)
            .ok_or_else(|| ChainError::NotFound(format!("Transaction not in queue: {id}")))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Transaction> {
        self.index
            .get(id)
            .and_then(|slot| self.transactions[*slot].as_mut())
            .ok_or_else(|| ChainError::NotFound(format!("Transaction not in queue: {id}")))
    }

    pub fn list(&self, options: ListOptions<'_, P>) -> Vec<QueueEntry<P>> {
        if options.limit == Some(0) {
            return Vec::new();
        }
        let mut entries: Vec<QueueEntry<P>> = self
            .transactions
            .iter()
            .flatten()
            .filter_map(|tx| {
                self.payload.get(&tx.id).map(|payload| QueueEntry {
                    tx: tx.clone(),
                    payload: payload.clone(),
                })
            })
            .filter(|entry| options.filter.as_ref().map_or(true, |f| f(entry)))
            .collect();
        if let Some(sort) = &options.sort {
            entries.sort_by(|a, b| sort(a, b));
        }
        if options.reverse {
            entries.reverse();
        }
        if let Some(limit) = options.limit {
            entries.truncate(limit);
        }
        entries
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions.iter().flatten().cloned().collect()
    }

    /// Compacts tombstones away, keeping insertion order.
    pub fn reindex(&mut self) {
        self.transactions.retain(Option::is_some);
        self.index = self
            .transactions
            .iter()
            .flatten()
            .enumerate()
            .map(|(slot, tx)| (tx.id.clone(), slot))
            .collect();
    }
}

/// Which queue a pooled transaction sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Received, not yet checked against account state
    Queued,
    /// Verified and applied to unconfirmed account state
    Unconfirmed,
    /// Multisignature transactions still collecting co-signatures
    Pending,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    pub queued: InnerTxQueue<PoolPayload>,
    pub unconfirmed: InnerTxQueue<PoolPayload>,
    pub pending: InnerTxQueue<PoolPayload>,
    max_queued: usize,
}

impl TransactionPool {
    pub fn new(max_queued: usize) -> TransactionPool {
        TransactionPool {
            max_queued,
            ..Default::default()
        }
    }

    pub fn queue_of(&self, id: &str) -> Option<QueueKind> {
        if self.unconfirmed.has(id) {
            Some(QueueKind::Unconfirmed)
        } else if self.pending.has(id) {
            Some(QueueKind::Pending)
        } else if self.queued.has(id) {
            Some(QueueKind::Queued)
        } else {
            None
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.queue_of(id).is_some()
    }

    pub fn count(&self) -> usize {
        self.queued.count() + self.unconfirmed.count() + self.pending.count()
    }

    pub fn queue(&mut self, tx: Transaction, payload: PoolPayload) -> Result<()> {
        if self.contains(&tx.id) {
            return Ok(());
        }
        if self.queued.count() >= self.max_queued {
            return Err(ChainError::tx("Transaction pool is full"));
        }
        self.queued.add(tx, payload);
        Ok(())
    }

    /// Drops the transaction from whichever queue holds it.
    pub fn remove(&mut self, id: &str) -> Option<QueueKind> {
        let kind = self.queue_of(id)?;
        match kind {
            QueueKind::Queued => self.queued.remove(id),
            QueueKind::Unconfirmed => self.unconfirmed.remove(id),
            QueueKind::Pending => self.pending.remove(id),
        };
        Some(kind)
    }

    /// Unconfirmed transactions in the order they were applied.
    pub fn unconfirmed_list(&self, limit: Option<usize>) -> Vec<Transaction> {
        self.unconfirmed
            .list(ListOptions {
                limit,
                ..Default::default()
            })
            .into_iter()
            .map(|entry| entry.tx)
            .collect()
    }

    pub fn expired(&self, now: i64) -> Vec<(QueueKind, Transaction)> {
        let expired = |entry: &QueueEntry<PoolPayload>| entry.payload.is_expired(now);
        let mut out = Vec::new();
        for (kind, queue) in [
            (QueueKind::Unconfirmed, &self.unconfirmed),
            (QueueKind::Pending, &self.pending),
            (QueueKind::Queued, &self.queued),
        ] {
            out.extend(
                queue
                    .list(ListOptions {
                        filter: Some(Box::new(expired)),
                        ..Default::default()
                    })
                    .into_iter()
                    .map(|entry| (kind, entry.tx)),
            );
        }
        out
    }

    pub fn reindex(&mut self) {
        self.queued.reindex();
        self.unconfirmed.reindex();
        self.pending.reindex();
    }
}
