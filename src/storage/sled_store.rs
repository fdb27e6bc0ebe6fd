use crate::core::account::Account;
use crate::core::block::Block;
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{DbOp, Filter, Row, Table};
use crate::storage::ledger::{LedgerState, LedgerStore, RoundSums, RowChange};
use log::{debug, info};
use sled::{Batch, Db, Tree};
use std::path::Path;

const LEDGER_TREE: &str = "ledger";
const SEQUENCE_KEY: &str = "meta/sequence";

/// Durable ledger: every table lives in one sled tree under
/// `<table>/<row key>` and each op list lands as a single sled batch.
pub struct SledLedger {
    db: Db,
    tree: Tree,
    state: LedgerState,
}

fn storage_key(table: Table, key: &str) -> String {
    format!("{}/{}", table.name(), key)
}

impl SledLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<SledLedger> {
        let db = sled::open(path.as_ref())
            .map_err(|e| ChainError::storage(format!("Failed to open database: {e}")))?;
        let tree = db
            .open_tree(LEDGER_TREE)
            .map_err(|e| ChainError::storage(format!("Failed to open ledger tree: {e}")))?;

        let mut state = LedgerState::new();
        for item in tree.iter() {
            let (k, v) = item
                .map_err(|e| ChainError::storage(format!("Failed to iterate ledger tree: {e}")))?;
            let key = std::str::from_utf8(&k)
                .map_err(|e| ChainError::storage(format!("Invalid ledger key: {e}")))?;
            if key == SEQUENCE_KEY {
                let sequence: u64 = serde_json::from_slice(&v)?;
                state.set_sequence(sequence);
                continue;
            }
            let (table, row_key) = key
                .split_once('/')
                .and_then(|(name, row_key)| Table::from_name(name).map(|t| (t, row_key)))
                .ok_or_else(|| ChainError::storage(format!("Unknown ledger key: {key}")))?;
            let row: Row = serde_json::from_slice(&v)?;
            state.insert_row(table, row_key.to_string(), row);
        }
        info!(
            "Opened ledger at {} ({} blocks)",
            path.as_ref().display(),
            state.rows(Table::Blocks).count()
        );

        Ok(SledLedger { db, tree, state })
    }

    fn persist(&self, changes: &[RowChange], sequence: Option<u64>) -> Result<()> {
        let mut batch = Batch::default();
        for change in changes {
            match change {
                RowChange::Put(table, key, row) => {
                    batch.insert(storage_key(*table, key).as_bytes(), serde_json::to_vec(row)?);
                }
                RowChange::Delete(table, key) => {
                    batch.remove(storage_key(*table, key).as_bytes());
                }
            }
        }
        if let Some(sequence) = sequence {
            batch.insert(SEQUENCE_KEY.as_bytes(), serde_json::to_vec(&sequence)?);
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| ChainError::storage(format!("Failed to apply batch: {e}")))
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl LedgerStore for SledLedger {
    fn apply_ops(&mut self, ops: &[DbOp]) -> Result<()> {
        let staged = self.state.stage(ops)?;
        let changes = self.state.staged_changes(&staged);
        let sequence = self
            .state
            .sequence_changed(&staged)
            .then(|| self.state.sequence());
        if let Err(e) = self.persist(&changes, sequence) {
            self.state.rollback(staged);
            return Err(e);
        }
        self.tree.flush()?;
        debug!("Persisted {} ops as {} row changes", ops.len(), changes.len());
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
    use crate::storage::db_ops::{row, Assignments, CustomQuery};
    use tempfile::TempDir;

    #[test]
    fn test_ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut ledger = SledLedger::open(dir.path()).unwrap();
            ledger
                .apply_ops(&[
                    DbOp::Create {
                        table: Table::Accounts,
                        values: row([("address", "1R")]),
                    },
                    DbOp::update(
                        Table::Accounts,
                        Filter::eq("address", "1R"),
                        Assignments::new().add("balance", 42),
                    ),
                    DbOp::Custom(CustomQuery::InsertMemRoundVote {
                        address: "1R".to_string(),
                        delegate: "ab".repeat(32),
                        block_id: "7".to_string(),
                        round: 1,
                        add: true,
                    }),
                ])
                .unwrap();
            ledger.flush().unwrap();
        }

        let ledger = SledLedger::open(dir.path()).unwrap();
        let account = ledger
            .find_account(&Filter::eq("address", "1R"))
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, 42);
        assert_eq!(
            ledger.find_rows(Table::MemRound, &Filter::all()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_rejected_batch_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let mut ledger = SledLedger::open(dir.path()).unwrap();
        let result = ledger.apply_ops(&[
            DbOp::Create {
                table: Table::Accounts,
                values: row([("address", "1R")]),
            },
            DbOp::update(
                Table::Accounts,
                Filter::eq("address", "1R"),
                Assignments::new().add("balance", -5),
            ),
        ]);
        assert!(result.is_err());
        drop(ledger);

        let ledger = SledLedger::open(dir.path()).unwrap();
        assert!(ledger.find_account(&Filter::all()).unwrap().is_none());
    }
}
