use crate::core::account::Account;
use crate::core::block::Block;
use crate::error::Result;
use crate::storage::db_ops::{DbOp, Filter, Row, Table};
use crate::storage::ledger::{LedgerState, LedgerStore, RoundSums};

/// Volatile ledger used by tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: LedgerState,
}

impl MemoryLedger {
    pub fn new() -> MemoryLedger {
        MemoryLedger::default()
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }
}

impl LedgerStore for MemoryLedger {
    fn apply_ops(&mut self, ops: &[DbOp]) -> Result<()> {
        self.state.stage(ops)?;
        Ok(())
    }

    fn find_rows(&self, table: Table, filter: &Filter) -> Result<Vec<Row>> {
        Ok(self.state.find_rows(table, filter))
    }

    fn find_accounts(&self, filter: &Filter) -> Result<Vec<Account>> {
        self.state.find_accounts(filter)
    }

    fn find_block_by_id(&self, id: &str) -> Result<Option<Block>> {
        self.state.find_block_by_id(id)
    }

    fn find_block_at_height(&self, height: u32) -> Result<Option<Block>> {
        self.state.find_block_at_height(height)
    }

    fn last_block(&self) -> Result<Option<Block>> {
        self.state.last_block()
    }

    fn last_block_ids(&self, limit: usize) -> Result<Vec<String>> {
        Ok(self.state.last_block_ids(limit))
    }

    fn sum_round(&self, active_delegates: u32, round: u64) -> Result<RoundSums> {
        self.state.sum_round(active_delegates, round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db_ops::{row, Assignments};

    #[test]
    fn test_failed_batch_leaves_no_trace() {
        let mut ledger = MemoryLedger::new();
        let ops = vec![
            DbOp::Create {
                table: Table::Accounts,
                values: row([("address", "1R")]),
            },
            DbOp::update(
                Table::Accounts,
                Filter::eq("address", "1R"),
                Assignments::new().add("balance", -1),
            ),
        ];
        assert!(ledger.apply_ops(&ops).is_err());
        assert!(ledger.find_account(&Filter::eq("address", "1R")).unwrap().is_none());

        ledger.apply_ops(&ops[..1]).unwrap();
        assert!(ledger.find_account(&Filter::eq("address", "1R")).unwrap().is_some());
    }
}
