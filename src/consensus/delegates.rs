use crate::config::Constants;
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{Filter, Table};
use crate::storage::ledger::LedgerStore;
use crate::utils::sha256_digest;
use log::trace;
use serde_json::Value;

/// Ranks delegates by vote weight and derives the per-round forging order.
#[derive(Debug, Clone, Copy)]
pub struct DelegatesLogic {
    active_delegates: u32,
}

impl DelegatesLogic {
    pub fn new(constants: &Constants) -> DelegatesLogic {
        DelegatesLogic {
            active_delegates: constants.active_delegates,
        }
    }

    /// Forging order of `round` from the live delegate weights.
    pub fn generate_delegate_list(&self, store: &dyn LedgerStore, round: u64) -> Result<Vec<Vec<u8>>> {
        let mut candidates = Vec::new();
        for account in store.find_accounts(&Filter::eq("isDelegate", true))? {
            if let Some(key) = account.public_key {
                candidates.push((key, account.vote));
            }
        }
        Ok(self.shuffled(candidates, round))
    }

    /// Forging order of `round` from the weights saved by the last votes
    /// snapshot. Used when a round is rolled back after its votes changed.
    /// Keys in `exclude` registered after the list was first generated.
    pub fn snapshot_delegate_list(
        &self,
        store: &dyn LedgerStore,
        round: u64,
        exclude: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>> {
        let mut candidates = Vec::new();
        for row in store.find_rows(Table::VotesSnapshot, &Filter::all())? {
            let Some(key) = row.get("publicKey").and_then(Value::as_str) else {
                continue;
            };
            let key = hex::decode(key)
                .map_err(|e| ChainError::storage(format!("Invalid snapshot public key: {e}")))?;
            if exclude.contains(&key) {
                continue;
            }
            let vote = row.get("vote").and_then(Value::as_u64).unwrap_or(0);
            candidates.push((key, vote));
        }
        Ok(self.shuffled(candidates, round))
    }

    fn shuffled(&self, mut candidates: Vec<(Vec<u8>, u64)>, round: u64) -> Vec<Vec<u8>> {
        candidates.sort_by(|(a_key, a_vote), (b_key, b_vote)| {
            b_vote.cmp(a_vote).then_with(|| a_key.cmp(b_key))
        });
        candidates.truncate(self.active_delegates as usize);
        let list = candidates.into_iter().map(|(key, _)| key).collect();
        let list = shuffle(list, round);
        trace!("Delegate list for round {round} has {} entries", list.len());
        list
    }
}

/// Deterministic reordering seeded by `sha256(round)`. Each seed drives four
/// swaps and is then re-hashed; one position after each group of four is
/// left in place.
pub fn shuffle<T>(mut list: Vec<T>, round: u64) -> Vec<T> {
    let count = list.len();
    if count == 0 {
        return list;
    }
    let mut seed = sha256_digest(round.to_string().as_bytes());
    let mut i = 0;
    while i < count {
        let mut x = 0;
        while x < 4 && i < count {
            let target = usize::from(seed[x]) % count;
            list.swap(target, i);
            i += 1;
            x += 1;
        }
        seed = sha256_digest(&seed);
        i += 1;
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db_ops::{row, DbOp};
    use crate::storage::memory::MemoryLedger;

    #[test]
    fn test_shuffle_is_deterministic_permutation() {
        let list: Vec<u32> = (0..101).collect();
        let a = shuffle(list.clone(), 7);
        let b = shuffle(list.clone(), 7);
        assert_eq!(a, b);
        assert_ne!(a, shuffle(list.clone(), 8));

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, list);
    }

    #[test]
    fn test_shuffle_small_lists() {
        assert!(shuffle(Vec::<u8>::new(), 1).is_empty());
        assert_eq!(shuffle(vec![9], 1), vec![9]);
    }

    fn delegate(key: u8, vote: u64) -> DbOp {
        DbOp::Create {
            table: Table::Accounts,
            values: row([
                ("address", Value::from(format!("{key}R"))),
                ("publicKey", Value::from(hex::encode([key; 32]))),
                ("isDelegate", Value::from(true)),
                ("vote", Value::from(vote)),
            ]),
        }
    }

    #[test]
    fn test_list_keeps_top_voted() {
        let mut store = MemoryLedger::new();
        store
            .apply_ops(&[delegate(1, 10), delegate(2, 30), delegate(3, 30), delegate(4, 5)])
            .unwrap();
        let constants = Constants {
            active_delegates: 3,
            ..Constants::default()
        };
        let logic = DelegatesLogic::new(&constants);

        let mut list = logic.generate_delegate_list(&store, 1).unwrap();
        list.sort();
        assert_eq!(list, vec![vec![1; 32], vec![2; 32], vec![3; 32]]);
    }

    #[test]
    fn test_snapshot_list_matches_live_list() {
        let mut store = MemoryLedger::new();
        store
            .apply_ops(&[delegate(1, 10), delegate(2, 30), delegate(3, 20)])
            .unwrap();
        store
            .apply_ops(&[DbOp::Custom(crate::storage::db_ops::CustomQuery::PerformVotesSnapshot)])
            .unwrap();
        let logic = DelegatesLogic::new(&Constants::default());
        assert_eq!(
            logic.generate_delegate_list(&store, 4).unwrap(),
            logic.snapshot_delegate_list(&store, 4, &[]).unwrap()
        );
        assert_eq!(
            logic.snapshot_delegate_list(&store, 4, &[vec![2; 32]]).unwrap().len(),
            2
        );
    }
}
