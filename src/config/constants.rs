//! Consensus constants
//!
//! Every node on a network must run with identical values here: they feed the
//! byte codec limits, the reward and fee schedules and the round arithmetic.

use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One entry of the height-indexed block reward schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardMilestone {
    pub from_height: u32,
    pub reward: u64,
}

/// Minimum fees per transaction kind, valid from `from_height` onwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeMilestone {
    pub from_height: u32,
    pub send: u64,
    pub vote: u64,
    pub second_signature: u64,
    pub delegate: u64,
    pub multisignature: u64,
    /// Added per byte of `asset.data` on send transactions
    pub send_data_multiplier: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constants {
    pub active_delegates: u32,
    pub max_votes_per_transaction: usize,
    pub max_votes_per_account: usize,
    pub max_payload_length: usize,
    pub max_txs_per_block: usize,
    /// How many recent block ids the receipt check remembers
    pub block_slot_window: usize,
    pub block_time: u32,
    /// Unix time (seconds) of the chain epoch; transaction timestamps count from here
    pub epoch: i64,
    pub total_amount: u64,
    pub max_txs_per_queue: usize,
    /// Seconds an unconfirmed transaction may sit in the pool
    pub unconfirmed_timeout: i64,
    /// Hours
    pub multisig_max_lifetime: u8,
    pub multisig_max_keysgroup: usize,
    pub send_data_max_length: usize,
    pub rewards: Vec<RewardMilestone>,
    pub fees: Vec<FeeMilestone>,
}

impl Default for Constants {
    fn default() -> Self {
        let rewards = [
            (1, 0),
            (10, 1_500_000_000),
            (11, 30_000_000),
            (12, 20_000_000),
            (13, 1_500_000_000),
            (1_054_080, 1_200_000_000),
            (1_054_080 * 2, 900_000_000),
            (1_054_080 * 3, 600_000_000),
            (1_054_080 * 4, 300_000_000),
            (1_054_080 * 5, 100_000_000),
        ]
        .into_iter()
        .map(|(from_height, reward)| RewardMilestone {
            from_height,
            reward,
        })
        .collect();

        Constants {
            active_delegates: 101,
            max_votes_per_transaction: 33,
            max_votes_per_account: 101,
            max_payload_length: 1024 * 1024,
            max_txs_per_block: 25,
            block_slot_window: 5,
            block_time: 30,
            epoch: 1_464_109_200,
            total_amount: 10_999_999_991_000_000,
            max_txs_per_queue: 1000,
            unconfirmed_timeout: 10_800,
            multisig_max_lifetime: 72,
            multisig_max_keysgroup: 15,
            send_data_max_length: 128,
            rewards,
            fees: vec![FeeMilestone {
                from_height: 1,
                send: 10_000_000,
                vote: 100_000_000,
                second_signature: 500_000_000,
                delegate: 2_500_000_000,
                multisignature: 500_000_000,
                send_data_multiplier: 1_000_000,
            }],
        }
    }
}

impl Constants {
    pub fn from_toml_str(input: &str) -> Result<Constants> {
        let constants: Constants = toml::from_str(input)?;
        constants.validate()?;
        Ok(constants)
    }

    pub fn load(path: &Path) -> Result<Constants> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.active_delegates == 0 {
            return Err(ChainError::Config(
                "active_delegates must be positive".to_string(),
            ));
        }
        if self.max_payload_length == 0 || self.max_txs_per_block == 0 {
            return Err(ChainError::Config(
                "block limits must be positive".to_string(),
            ));
        }
        if self.block_slot_window == 0 || self.block_time == 0 {
            return Err(ChainError::Config(
                "block_slot_window and block_time must be positive".to_string(),
            ));
        }
        check_schedule("rewards", self.rewards.iter().map(|m| m.from_height))?;
        check_schedule("fees", self.fees.iter().map(|m| m.from_height))?;
        Ok(())
    }
}

fn check_schedule(name: &str, heights: impl Iterator<Item = u32>) -> Result<()> {
    let heights: Vec<u32> = heights.collect();
    match heights.first() {
        None => return Err(ChainError::Config(format!("{name} schedule is empty"))),
        Some(first) if *first != 1 => {
            return Err(ChainError::Config(format!(
                "{name} schedule must start at height 1"
            )))
        }
        _ => {}
    }
    if heights.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ChainError::Config(format!(
            "{name} schedule heights must be strictly increasing"
        )));
    }
    Ok(())
}
