use super::delegates::DelegatesLogic;
use super::round::{RoundLogic, RoundScope};
use crate::config::Constants;
use crate::core::block::Block;
use crate::core::tx_types::TransactionKind;
use crate::error::Result;
use crate::storage::db_ops::DbOp;
use crate::storage::ledger::LedgerStore;
use crate::utils::derive_address;
use log::info;
use num_bigint::BigUint;
use std::collections::HashSet;
use std::sync::Arc;

/// Round a height belongs to; round 1 spans heights 1..=active_delegates.
pub fn calc_round(height: u32, active_delegates: u32) -> u64 {
    u64::from(height).div_ceil(u64::from(active_delegates.max(1)))
}

/// Decides when a block closes a round and builds the settlement ops.
pub struct RoundsLogic {
    constants: Arc<Constants>,
    delegates: DelegatesLogic,
}

impl RoundsLogic {
    pub fn new(constants: Arc<Constants>) -> RoundsLogic {
        RoundsLogic {
            delegates: DelegatesLogic::new(&constants),
            constants,
        }
    }

    pub fn calc_round(&self, height: u32) -> u64 {
        calc_round(height, self.constants.active_delegates)
    }

    /// Last block of a round, or the genesis block.
    pub fn finishes_round(&self, height: u32) -> bool {
        height == 1 || self.calc_round(height) != self.calc_round(height + 1)
    }

    pub fn delegates(&self) -> &DelegatesLogic {
        &self.delegates
    }

    /// Settlement ops for `block`, which is about to be stored. `store`
    /// still reflects the state before the block.
    pub fn tick(&self, block: &Block, store: &dyn LedgerStore) -> Result<Vec<DbOp>> {
        if !self.finishes_round(block.height) {
            return Ok(Vec::new());
        }
        let round = self.calc_round(block.height);
        if block.height == 1 {
            let scope = RoundScope {
                round,
                block_id: block.id.clone(),
                ..RoundScope::default()
            };
            return Ok(RoundLogic::new(scope, &self.constants).land());
        }

        let active = self.constants.active_delegates;
        let mut sums = store.sum_round(active, round)?;
        sums.fees += BigUint::from(block.total_fee);
        sums.rewards.push(block.reward);
        sums.delegates.push(block.generator_public_key.clone());

        let list = self.delegates.generate_delegate_list(store, round)?;
        let scope = RoundScope {
            round,
            block_id: block.id.clone(),
            outsiders: outsiders(&list, &sums.delegates),
            fees: sums.fees,
            rewards: sums.rewards,
            delegates: sums.delegates,
        };
        info!(
            "Finishing round {round} at height {} ({} outsiders)",
            block.height,
            scope.outsiders.len()
        );
        Ok(RoundLogic::new(scope, &self.constants).land())
    }

    /// Ops undoing the settlement of `block`, which is still stored and about
    /// to be removed.
    pub fn backward_tick(&self, block: &Block, store: &dyn LedgerStore) -> Result<Vec<DbOp>> {
        if block.height <= 1 || !self.finishes_round(block.height) {
            return Ok(Vec::new());
        }
        let round = self.calc_round(block.height);
        let sums = store.sum_round(self.constants.active_delegates, round)?;

        let registered: Vec<Vec<u8>> = block
            .transactions
            .iter()
            .filter(|tx| tx.tx_type == TransactionKind::Delegate as u8)
            .map(|tx| tx.sender_public_key.clone())
            .collect();
        let list = self
            .delegates
            .snapshot_delegate_list(store, round, &registered)?;

        let scope = RoundScope {
            round,
            block_id: block.id.clone(),
            outsiders: outsiders(&list, &sums.delegates),
            fees: sums.fees,
            rewards: sums.rewards,
            delegates: sums.delegates,
        };
        info!("Rolling back round {round} at height {}", block.height);
        Ok(RoundLogic::new(scope, &self.constants).backward_land())
    }
}

/// Addresses of listed delegates that forged none of `forgers`' blocks.
fn outsiders(list: &[Vec<u8>], forgers: &[Vec<u8>]) -> Vec<String> {
    let forged: HashSet<&[u8]> = forgers.iter().map(Vec::as_slice).collect();
    list.iter()
        .filter(|key| !forged.contains(key.as_slice()))
        .map(|key| derive_address(key))
        .collect()
}
