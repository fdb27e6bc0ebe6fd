use super::{account_update, invalid_asset, relation_ops, TransactionKind, TransactionType, TxContext};
use crate::config::{Constants, FeeMilestone};
use crate::core::account::Account;
use crate::core::block::Block;
use crate::core::transaction::{Transaction, TransactionAsset};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, Assignments, CustomQuery, DbOp, Filter, Row, Table};
use crate::utils::{diff, is_valid_public_key_hex};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// Adds (`+key`) or removes (`-key`) votes for delegates.
pub struct VoteTransaction;

impl VoteTransaction {
    fn votes(tx: &Transaction) -> Result<&[String]> {
        match &tx.asset {
            Some(TransactionAsset::Vote { votes }) => Ok(votes),
            _ => Err(invalid_asset(tx)),
        }
    }

    fn check_format(votes: &[String], max: usize) -> Result<()> {
        if votes.is_empty() {
            return Err(ChainError::tx("Invalid votes. Must not be empty"));
        }
        if votes.len() > max {
            return Err(ChainError::tx(format!(
                "Voting limit exceeded. Maximum is {max} votes per transaction"
            )));
        }
        let mut keys = HashSet::new();
        for vote in votes {
            let key = vote
                .strip_prefix('+')
                .or_else(|| vote.strip_prefix('-'))
                .ok_or_else(|| ChainError::tx("Invalid vote format"))?;
            if !is_valid_public_key_hex(key) {
                return Err(ChainError::tx("Invalid vote publicKey"));
            }
            if !keys.insert(key) {
                return Err(ChainError::tx(
                    "Multiple votes for same delegate are not allowed",
                ));
            }
        }
        Ok(())
    }

    /// Checks the vote diff against the voter's current set of delegates.
    fn check_membership(
        existing: &BTreeSet<String>,
        votes: &[String],
        constants: &Constants,
    ) -> Result<()> {
        for vote in votes {
            if let Some(key) = vote.strip_prefix('+') {
                if existing.contains(key) {
                    return Err(ChainError::tx(
                        "Failed to add vote, account has already voted for this delegate",
                    ));
                }
            } else if let Some(key) = vote.strip_prefix('-') {
                if !existing.contains(key) {
                    return Err(ChainError::tx(
                        "Failed to remove vote, account has not voted for this delegate",
                    ));
                }
            }
        }

        let total = existing.len() + diff::added(votes).len() - diff::removed(votes).len();
        let max = constants.max_votes_per_account;
        if total > max {
            return Err(ChainError::tx(format!(
                "Maximum number of votes exceeded ({total} > {max})"
            )));
        }
        Ok(())
    }

    fn check_delegates_exist(votes: &[String], ctx: &TxContext<'_>) -> Result<()> {
        for key in diff::added(votes) {
            let delegate = ctx
                .store
                .find_account(&Filter::eq("publicKey", key).and_eq("isDelegate", true))?;
            if delegate.is_none() {
                return Err(ChainError::tx("Delegate not found"));
            }
        }
        Ok(())
    }

    /// Confirmed vote relations plus the round-local vote deltas.
    fn confirmed_ops(votes: &[String], block: &Block, sender: &Account, ctx: &TxContext<'_>) -> Vec<DbOp> {
        let round = ctx.round();
        let mut ops = relation_ops(Table::Accounts2Delegates, &sender.address, votes);
        ops.push(account_update(
            &sender.address,
            Assignments::new().set("blockId", block.id.as_str()),
        ));
        for vote in votes {
            let (add, delegate) = match vote.strip_prefix('+') {
                Some(key) => (true, key),
                None => (false, vote.trim_start_matches('-')),
            };
            ops.push(DbOp::Custom(CustomQuery::InsertMemRoundVote {
                address: sender.address.clone(),
                delegate: delegate.to_string(),
                block_id: block.id.clone(),
                round,
                add,
            }));
        }
        ops
    }
}

impl TransactionType for VoteTransaction {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Vote
    }

    fn calculate_min_fee(
        &self,
        _tx: &Transaction,
        _sender: &Account,
        fees: &FeeMilestone,
    ) -> Result<u64> {
        Ok(fees.vote)
    }

    fn asset_bytes(&self, tx: &Transaction) -> Result<Vec<u8>> {
        Ok(Self::votes(tx)?.concat().into_bytes())
    }

    fn verify(&self, tx: &Transaction, sender: &Account, ctx: &TxContext<'_>) -> Result<()> {
        if tx.recipient_id.as_deref() != Some(sender.address.as_str()) {
            return Err(ChainError::tx("Missing recipient"));
        }
        let votes = Self::votes(tx)?;
        Self::check_format(votes, ctx.constants.max_votes_per_transaction)?;
        Self::check_membership(&sender.delegates, votes, ctx.constants)?;
        Self::check_delegates_exist(votes, ctx)
    }

    fn apply(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let votes = Self::votes(tx)?;
        Self::check_membership(&sender.delegates, votes, ctx.constants)?;
        diff::apply(&mut sender.delegates, votes);
        Ok(Self::confirmed_ops(votes, block, sender, ctx))
    }

    fn undo(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let reversed = diff::reverse(Self::votes(tx)?);
        diff::apply(&mut sender.delegates, &reversed);
        Ok(Self::confirmed_ops(&reversed, block, sender, ctx))
    }

    fn apply_unconfirmed(
        &self,
        tx: &Transaction,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let votes = Self::votes(tx)?;
        Self::check_membership(&sender.u_delegates, votes, ctx.constants)?;
        diff::apply(&mut sender.u_delegates, votes);
        Ok(relation_ops(Table::Accounts2UDelegates, &sender.address, votes))
    }

    fn undo_unconfirmed(
        &self,
        tx: &Transaction,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let reversed = diff::reverse(Self::votes(tx)?);
        diff::apply(&mut sender.u_delegates, &reversed);
        Ok(relation_ops(
            Table::Accounts2UDelegates,
            &sender.address,
            &reversed,
        ))
    }

    fn object_normalize(&self, tx: Transaction, constants: &Constants) -> Result<Transaction> {
        let votes = Self::votes(&tx)?;
        if votes.is_empty() || votes.len() > constants.max_votes_per_transaction {
            return Err(ChainError::schema(
                "asset.votes",
                format!(
                    "Array length {} is outside 1..={}",
                    votes.len(),
                    constants.max_votes_per_transaction
                ),
            ));
        }
        let unique: HashSet<&String> = votes.iter().collect();
        if unique.len() != votes.len() {
            return Err(ChainError::schema("asset.votes", "Array items are not unique"));
        }
        Ok(tx)
    }

    fn db_save(&self, tx: &Transaction) -> Result<Option<DbOp>> {
        Ok(Some(DbOp::Create {
            table: Table::Votes,
            values: row([
                ("transactionId", tx.id.clone()),
                ("votes", Self::votes(tx)?.join(",")),
            ]),
        }))
    }

    fn asset_table(&self) -> Option<Table> {
        Some(Table::Votes)
    }

    fn asset_from_row(&self, row: &Row) -> Result<Option<TransactionAsset>> {
        Ok(row.get("votes").and_then(Value::as_str).map(|votes| {
            TransactionAsset::Vote {
                votes: votes.split(',').map(str::to_string).collect(),
            }
        }))
    }
}
