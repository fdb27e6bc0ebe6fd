use num_bigint::BigUint;

/// Per-delegate share of a finished round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundChange {
    /// fees + rewards
    pub balance: BigUint,
    pub fees: BigUint,
    /// Part of the round fees that does not divide evenly
    pub fees_remaining: BigUint,
    pub rewards: u64,
}

/// Splits the fees collected in a round evenly across its forging slots.
#[derive(Debug, Clone)]
pub struct RoundChanges {
    fees: BigUint,
    rewards: Vec<u64>,
    active_delegates: u32,
}

impl RoundChanges {
    pub fn new(fees: BigUint, rewards: Vec<u64>, active_delegates: u32) -> RoundChanges {
        RoundChanges {
            fees,
            rewards,
            active_delegates,
        }
    }

    /// Share of the delegate that forged the `index`-th block of the round.
    pub fn at(&self, index: usize) -> RoundChange {
        let slots = BigUint::from(self.active_delegates.max(1));
        let fees = &self.fees / &slots;
        let fees_remaining = &self.fees - &fees * &slots;
        let rewards = self.rewards.get(index).copied().unwrap_or(0);
        RoundChange {
            balance: &fees + BigUint::from(rewards),
            fees,
            fees_remaining,
            rewards,
        }
    }
}
