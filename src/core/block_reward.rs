//! Height-indexed block reward schedule and the resulting coin supply.

use crate::config::{Constants, RewardMilestone};
use num_bigint::BigUint;

#[derive(Debug, Clone)]
pub struct BlockReward {
    milestones: Vec<RewardMilestone>,
    initial_supply: u64,
}

impl BlockReward {
    pub fn new(constants: &Constants) -> BlockReward {
        BlockReward {
            milestones: constants.rewards.clone(),
            initial_supply: constants.total_amount,
        }
    }

    /// Index of the milestone in force at `height`.
    pub fn calc_milestone(&self, height: u32) -> usize {
        self.milestones
            .iter()
            .rposition(|m| height >= m.from_height)
            .unwrap_or(0)
    }

    pub fn calc_reward(&self, height: u32) -> u64 {
        if height == 0 {
            return 0;
        }
        self.milestones
            .get(self.calc_milestone(height))
            .map(|m| m.reward)
            .unwrap_or(0)
    }

    /// Initial supply plus every reward paid up to and including `height`.
    pub fn calc_supply(&self, height: u32) -> BigUint {
        let mut supply = BigUint::from(self.initial_supply);
        for (i, milestone) in self.milestones.iter().enumerate() {
            if milestone.from_height > height {
                break;
            }
            let end = self
                .milestones
                .get(i + 1)
                .map(|next| next.from_height.saturating_sub(1).min(height))
                .unwrap_or(height);
            let blocks = u64::from(end - milestone.from_height + 1);
            supply += BigUint::from(milestone.reward) * blocks;
        }
        supply
    }
}
