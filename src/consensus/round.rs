use super::round_changes::RoundChanges;
use crate::config::Constants;
use crate::core::account::{merge_balance_diff, RoundRef};
use crate::storage::db_ops::{Assignments, CustomQuery, DbOp, Filter, Table};
use crate::utils::derive_address;
use log::debug;
use num_bigint::{BigInt, BigUint};

/// Everything needed to settle (or unsettle) one finished round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundScope {
    pub round: u64,
    /// Block that closes the round
    pub block_id: String,
    pub fees: BigUint,
    /// Reward of every block of the round, in height order
    pub rewards: Vec<u64>,
    /// Generator of every block of the round, in height order
    pub delegates: Vec<Vec<u8>>,
    /// Addresses of listed delegates that forged nothing this round
    pub outsiders: Vec<String>,
}

pub struct RoundLogic {
    scope: RoundScope,
    active_delegates: u32,
}

impl RoundLogic {
    pub fn new(scope: RoundScope, constants: &Constants) -> RoundLogic {
        RoundLogic {
            scope,
            active_delegates: constants.active_delegates,
        }
    }

    pub fn scope(&self) -> &RoundScope {
        &self.scope
    }

    /// Missed-block counter change for the outsiders; `None` when every
    /// listed delegate forged.
    pub fn update_missed_blocks(&self, backwards: bool) -> Option<DbOp> {
        if self.scope.outsiders.is_empty() {
            return None;
        }
        let set = if backwards {
            Assignments::new().add("missedblocks", -1)
        } else {
            Assignments::new().add("missedblocks", 1).set("cmb", 0)
        };
        Some(DbOp::update(
            Table::Accounts,
            Filter::is_in("address", self.scope.outsiders.iter().map(String::as_str)),
            set,
        ))
    }

    /// Credits (or debits, going backwards) every forger with its share of
    /// the round fees and its block reward. The fee remainder goes to the
    /// forger of the last block.
    pub fn apply_round(&self, backwards: bool) -> Vec<DbOp> {
        let changes = RoundChanges::new(
            self.scope.fees.clone(),
            self.scope.rewards.clone(),
            self.active_delegates,
        );
        let signed = |value: BigUint| {
            let value = BigInt::from(value);
            if backwards {
                -value
            } else {
                value
            }
        };
        let round_ref = RoundRef {
            block_id: self.scope.block_id.clone(),
            round: self.scope.round,
        };

        let mut ops = Vec::new();
        let mut remaining = BigUint::default();
        for (index, delegate) in self.scope.delegates.iter().enumerate() {
            let change = changes.at(index);
            let address = derive_address(delegate);
            let balance = signed(change.balance);
            ops.extend(merge_balance_diff(
                &address,
                balance.clone(),
                balance,
                Some(&round_ref),
            ));

            let mut set = Assignments::new()
                .add("fees", signed(change.fees))
                .add("rewards", signed(BigUint::from(change.rewards)))
                .add("producedblocks", if backwards { -1 } else { 1 });
            if !backwards {
                set = set.set("cmb", 0);
            }
            ops.push(DbOp::update(
                Table::Accounts,
                Filter::eq("address", address.as_str()),
                set,
            ));
            remaining = change.fees_remaining;
        }

        if remaining > BigUint::default() {
            if let Some(last) = self.scope.delegates.last() {
                let address = derive_address(last);
                let remainder = signed(remaining);
                debug!("Round {} fee remainder {remainder} to {address}", self.scope.round);
                ops.extend(merge_balance_diff(
                    &address,
                    remainder.clone(),
                    remainder.clone(),
                    Some(&round_ref),
                ));
                ops.push(DbOp::update(
                    Table::Accounts,
                    Filter::eq("address", address.as_str()),
                    Assignments::new().add("fees", remainder),
                ));
            }
        }
        ops
    }

    pub fn perform_votes_snapshot(&self) -> DbOp {
        DbOp::Custom(CustomQuery::PerformVotesSnapshot)
    }

    pub fn restore_votes_snapshot(&self) -> DbOp {
        DbOp::Custom(CustomQuery::RestoreVotesSnapshot)
    }

    pub fn recalc_votes(&self) -> DbOp {
        DbOp::Custom(CustomQuery::RecalcVotes {
            round: self.scope.round,
        })
    }

    /// Forward settlement: missed blocks, payouts, snapshot, vote recalculation.
    pub fn land(&self) -> Vec<DbOp> {
        let mut ops: Vec<DbOp> = self.update_missed_blocks(false).into_iter().collect();
        ops.extend(self.apply_round(false));
        ops.push(self.perform_votes_snapshot());
        ops.push(self.recalc_votes());
        ops
    }

    /// Exact inverse of [`land`](Self::land).
    pub fn backward_land(&self) -> Vec<DbOp> {
        let mut ops: Vec<DbOp> = self.update_missed_blocks(true).into_iter().collect();
        ops.extend(self.apply_round(true));
        ops.push(self.restore_votes_snapshot());
        ops
    }
}
