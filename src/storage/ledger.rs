//! Ledger store contract and the row-level executor shared by every backend.

use crate::core::account::Account;
use crate::core::block::Block;
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, Assignments, Change, CustomQuery, DbOp, Filter, Row, Table};
use log::debug;
use num_bigint::{BigInt, BigUint};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Aggregates of every stored block belonging to one round, in height order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundSums {
    pub fees: BigUint,
    pub rewards: Vec<u64>,
    pub delegates: Vec<Vec<u8>>,
}

/// Persistence seam of the node. `apply_ops` is all-or-nothing: on error no
/// op of the list is visible afterwards.
pub trait LedgerStore: Send + Sync {
    fn apply_ops(&mut self, ops: &[DbOp]) -> Result<()>;

    fn find_rows(&self, table: Table, filter: &Filter) -> Result<Vec<Row>>;

    /// Accounts with their vote and multisignature sets filled in.
    fn find_accounts(&self, filter: &Filter) -> Result<Vec<Account>>;

    fn find_account(&self, filter: &Filter) -> Result<Option<Account>> {
        Ok(self.find_accounts(filter)?.into_iter().next())
    }

    /// Block headers only; transactions are attached by the caller.
    fn find_block_by_id(&self, id: &str) -> Result<Option<Block>>;

    fn find_block_at_height(&self, height: u32) -> Result<Option<Block>>;

    fn last_block(&self) -> Result<Option<Block>>;

    /// Ids of the newest `limit` blocks, oldest first.
    fn last_block_ids(&self, limit: usize) -> Result<Vec<String>>;

    fn sum_round(&self, active_delegates: u32, round: u64) -> Result<RoundSums>;
}

/// A single row difference between two ledger states.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Put(Table, String, Row),
    Delete(Table, String),
}

/// Pre-batch copies of the tables a batch may write, kept until the batch
/// is committed or rolled back.
#[derive(Debug)]
pub struct StagedBatch {
    saved: Vec<(Table, Option<BTreeMap<String, Row>>)>,
    sequence: u64,
}

/// In-memory tables plus the op executor. Backends stage each batch and only
/// keep it when every op succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerState {
    tables: BTreeMap<Table, BTreeMap<String, Row>>,
    sequence: u64,
}

fn padded(n: u64) -> String {
    format!("{n:020}")
}

fn key_part(table: Table, column: &str, value: Option<&Value>) -> Result<String> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(padded)
            .ok_or_else(|| ChainError::storage(format!("Invalid key {column} for {table}: {n}"))),
        _ => Err(ChainError::storage(format!(
            "Missing key column {column} for {table}"
        ))),
    }
}

fn bigint_of(value: Option<&Value>) -> Option<BigInt> {
    match value {
        None | Some(Value::Null) => Some(BigInt::from(0)),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(BigInt::from)
            .or_else(|| n.as_i64().map(BigInt::from)),
        _ => None,
    }
}

fn u64_of(row: &Row, column: &str) -> u64 {
    row.get(column).and_then(Value::as_u64).unwrap_or(0)
}

fn str_of<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn bigint_value(value: &BigInt) -> Result<Value> {
    i64::try_from(value)
        .map(Value::from)
        .map_err(|_| ChainError::storage(format!("Amount out of range: {value}")))
}

impl LedgerState {
    pub fn new() -> LedgerState {
        LedgerState::default()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn rows(&self, table: Table) -> impl Iterator<Item = &Row> {
        self.tables.get(&table).into_iter().flat_map(|t| t.values())
    }

    pub fn get(&self, table: Table, key: &str) -> Option<&Row> {
        self.tables.get(&table).and_then(|t| t.get(key))
    }

    /// Loads a stored row verbatim.
    pub fn insert_row(&mut self, table: Table, key: String, row: Row) {
        self.tables.entry(table).or_default().insert(key, row);
    }

    pub fn find_rows(&self, table: Table, filter: &Filter) -> Vec<Row> {
        self.rows(table)
            .filter(|row| filter.matches(row))
            .cloned()
            .collect()
    }

    fn row_key(&mut self, table: Table, row: &Row) -> Result<String> {
        let columns = table.key_columns();
        if columns.is_empty() {
            self.sequence += 1;
            return Ok(padded(self.sequence));
        }
        let parts = columns
            .iter()
            .map(|column| key_part(table, column, row.get(*column)))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join("/"))
    }

    /// Executes `ops` as one unit. Only the tables the ops can write are
    /// copied beforehand; a failing op puts them back.
    pub fn stage(&mut self, ops: &[DbOp]) -> Result<StagedBatch> {
        let touched: BTreeSet<Table> = ops.iter().flat_map(DbOp::written_tables).collect();
        let staged = StagedBatch {
            saved: touched
                .into_iter()
                .map(|table| (table, self.tables.get(&table).cloned()))
                .collect(),
            sequence: self.sequence,
        };
        if let Err(e) = self.execute_all(ops) {
            self.rollback(staged);
            return Err(e);
        }
        Ok(staged)
    }

    /// Restores the tables saved by [`LedgerState::stage`].
    pub fn rollback(&mut self, staged: StagedBatch) {
        for (table, rows) in staged.saved {
            match rows {
                Some(rows) => {
                    self.tables.insert(table, rows);
                }
                None => {
                    self.tables.remove(&table);
                }
            }
        }
        self.sequence = staged.sequence;
    }

    /// Row changes made since `staged`, limited to the tables it saved.
    pub fn staged_changes(&self, staged: &StagedBatch) -> Vec<RowChange> {
        let empty = BTreeMap::new();
        let mut changes = Vec::new();
        for (table, before) in &staged.saved {
            let before = before.as_ref().unwrap_or(&empty);
            let after = self.tables.get(table).unwrap_or(&empty);
            table_diff(*table, before, after, &mut changes);
        }
        changes
    }

    pub fn sequence_changed(&self, staged: &StagedBatch) -> bool {
        self.sequence != staged.sequence
    }

    pub fn execute_all(&mut self, ops: &[DbOp]) -> Result<()> {
        for op in ops {
            self.execute(op)?;
        }
        Ok(())
    }

    pub fn execute(&mut self, op: &DbOp) -> Result<()> {
        match op {
            DbOp::Create { table, values } => self.create(*table, values.clone()),
            DbOp::BulkCreate { table, values } => {
                for values in values {
                    self.create(*table, values.clone())?;
                }
                Ok(())
            }
            DbOp::Upsert { table, values } => self.upsert(*table, values),
            DbOp::Update { table, filter, set } => self.update(*table, filter, set),
            DbOp::Remove { table, filter } => {
                if let Some(rows) = self.tables.get_mut(table) {
                    rows.retain(|_, row| !filter.matches(row));
                }
                Ok(())
            }
            DbOp::Custom(query) => self.custom(query),
        }
    }

    fn create(&mut self, table: Table, values: Row) -> Result<()> {
        let key = self.row_key(table, &values)?;
        let rows = self.tables.entry(table).or_default();
        if rows.contains_key(&key) {
            return Err(ChainError::storage(format!(
                "Duplicate key {key} in {table}"
            )));
        }
        rows.insert(key, values);
        Ok(())
    }

    fn upsert(&mut self, table: Table, values: &Row) -> Result<()> {
        let key = self.row_key(table, values)?;
        let existing = self
            .tables
            .entry(table)
            .or_default()
            .entry(key)
            .or_default();
        for (column, value) in values {
            existing.insert(column.clone(), value.clone());
        }
        Ok(())
    }

    fn update(&mut self, table: Table, filter: &Filter, set: &Assignments) -> Result<()> {
        let Some(rows) = self.tables.get_mut(&table) else {
            return Ok(());
        };
        for (key, row) in rows.iter_mut().filter(|(_, row)| filter.matches(row)) {
            for (column, change) in set.iter() {
                let value = match change {
                    Change::Set(value) => value.clone(),
                    Change::Add(delta) => {
                        let current = bigint_of(row.get(column)).ok_or_else(|| {
                            ChainError::storage(format!("{table}.{column} on {key} is not numeric"))
                        })?;
                        let next = current + delta;
                        let next = u64::try_from(&next).map_err(|_| {
                            ChainError::storage(format!(
                                "{table}.{column} on {key} out of range: {next}"
                            ))
                        })?;
                        Value::from(next)
                    }
                };
                row.insert(column.clone(), value);
            }
        }
        Ok(())
    }

    fn custom(&mut self, query: &CustomQuery) -> Result<()> {
        match query {
            CustomQuery::InsertMemRoundVote {
                address,
                delegate,
                block_id,
                round,
                add,
            } => {
                let balance = self
                    .get(Table::Accounts, address)
                    .map(|row| u64_of(row, "balance"))
                    .unwrap_or(0);
                let amount = if *add {
                    BigInt::from(balance)
                } else {
                    -BigInt::from(balance)
                };
                self.create(
                    Table::MemRound,
                    row([
                        ("address", Value::from(address.as_str())),
                        ("amount", bigint_value(&amount)?),
                        ("delegate", Value::from(delegate.as_str())),
                        ("blockId", Value::from(block_id.as_str())),
                        ("round", Value::from(*round)),
                    ]),
                )
            }
            CustomQuery::InsertMemRoundBalance {
                address,
                amount,
                block_id,
                round,
            } => {
                let amount = bigint_value(amount)?;
                for delegate in self.relation_set(Table::Accounts2Delegates, address) {
                    self.create(
                        Table::MemRound,
                        row([
                            ("address", Value::from(address.as_str())),
                            ("amount", amount.clone()),
                            ("delegate", Value::from(delegate)),
                            ("blockId", Value::from(block_id.as_str())),
                            ("round", Value::from(*round)),
                        ]),
                    )?;
                }
                Ok(())
            }
            CustomQuery::PerformVotesSnapshot => {
                let snapshot: BTreeMap<String, Row> = self
                    .rows(Table::Accounts)
                    .filter(|row| row.get("isDelegate") == Some(&Value::Bool(true)))
                    .filter_map(|account| {
                        let address = str_of(account, "address")?.to_string();
                        let values = row([
                            ("address", Value::from(address.as_str())),
                            (
                                "publicKey",
                                account.get("publicKey").cloned().unwrap_or(Value::Null),
                            ),
                            ("vote", Value::from(u64_of(account, "vote"))),
                        ]);
                        Some((address, values))
                    })
                    .collect();
                debug!("Snapshotting votes of {} delegates", snapshot.len());
                self.tables.insert(Table::VotesSnapshot, snapshot);
                Ok(())
            }
            CustomQuery::RestoreVotesSnapshot => {
                let snapshot: Vec<(String, u64)> = self
                    .rows(Table::VotesSnapshot)
                    .filter_map(|row| Some((str_of(row, "address")?.to_string(), u64_of(row, "vote"))))
                    .collect();
                if let Some(accounts) = self.tables.get_mut(&Table::Accounts) {
                    for (address, vote) in snapshot {
                        if let Some(account) = accounts.get_mut(&address) {
                            account.insert("vote".to_string(), Value::from(vote));
                        }
                    }
                }
                Ok(())
            }
            CustomQuery::RecalcVotes { round } => {
                let touched: BTreeSet<String> = self
                    .rows(Table::MemRound)
                    .filter(|row| u64_of(row, "round") <= *round)
                    .filter_map(|row| str_of(row, "delegate").map(str::to_string))
                    .collect();
                debug!("Recalculating votes of {} delegates for round {round}", touched.len());
                self.recalc_votes(&touched)?;
                if let Some(rows) = self.tables.get_mut(&Table::MemRound) {
                    rows.retain(|_, row| u64_of(row, "round") > *round);
                }
                Ok(())
            }
        }
    }

    /// The weight of each delegate in `delegates` (public keys) becomes the
    /// sum of the balances of its voters.
    fn recalc_votes(&mut self, delegates: &BTreeSet<String>) -> Result<()> {
        if delegates.is_empty() {
            return Ok(());
        }
        let mut weights: HashMap<String, u128> = HashMap::new();
        for relation in self.rows(Table::Accounts2Delegates) {
            let (Some(voter), Some(delegate)) =
                (str_of(relation, "accountId"), str_of(relation, "dependentId"))
            else {
                continue;
            };
            if !delegates.contains(delegate) {
                continue;
            }
            let balance = self
                .get(Table::Accounts, voter)
                .map(|row| u64_of(row, "balance"))
                .unwrap_or(0);
            *weights.entry(delegate.to_string()).or_default() += u128::from(balance);
        }

        let Some(accounts) = self.tables.get_mut(&Table::Accounts) else {
            return Ok(());
        };
        for (address, account) in accounts.iter_mut() {
            if account.get("isDelegate") != Some(&Value::Bool(true)) {
                continue;
            }
            let Some(key) = str_of(account, "publicKey").filter(|key| delegates.contains(*key))
            else {
                continue;
            };
            let weight = weights.get(key).copied().unwrap_or(0);
            let weight = u64::try_from(weight).map_err(|_| {
                ChainError::storage(format!("Vote weight of {address} out of range"))
            })?;
            account.insert("vote".to_string(), Value::from(weight));
        }
        Ok(())
    }

    fn relation_set(&self, table: Table, address: &str) -> BTreeSet<String> {
        let prefix = format!("{address}/");
        self.tables
            .get(&table)
            .map(|rows| {
                rows.range(prefix.clone()..)
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .filter_map(|(_, row)| str_of(row, "dependentId").map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_accounts(&self, filter: &Filter) -> Result<Vec<Account>> {
        self.rows(Table::Accounts)
            .filter(|row| filter.matches(row))
            .map(|row| {
                let mut account = Account::from_row(row)?;
                account.delegates = self.relation_set(Table::Accounts2Delegates, &account.address);
                account.u_delegates =
                    self.relation_set(Table::Accounts2UDelegates, &account.address);
                account.multisignatures =
                    self.relation_set(Table::Accounts2Multisignatures, &account.address);
                account.u_multisignatures =
                    self.relation_set(Table::Accounts2UMultisignatures, &account.address);
                Ok(account)
            })
            .collect()
    }

    fn blocks(&self) -> Option<&BTreeMap<String, Row>> {
        self.tables.get(&Table::Blocks)
    }

    pub fn find_block_by_id(&self, id: &str) -> Result<Option<Block>> {
        self.rows(Table::Blocks)
            .find(|row| str_of(row, "id") == Some(id))
            .map(Block::from_row)
            .transpose()
    }

    pub fn find_block_at_height(&self, height: u32) -> Result<Option<Block>> {
        self.get(Table::Blocks, &padded(u64::from(height)))
            .map(Block::from_row)
            .transpose()
    }

    pub fn last_block(&self) -> Result<Option<Block>> {
        self.blocks()
            .and_then(|rows| rows.values().next_back())
            .map(Block::from_row)
            .transpose()
    }

    pub fn last_block_ids(&self, limit: usize) -> Vec<String> {
        let mut ids: Vec<String> = self
            .blocks()
            .into_iter()
            .flat_map(|rows| rows.values().rev())
            .take(limit)
            .filter_map(|row| str_of(row, "id").map(str::to_string))
            .collect();
        ids.reverse();
        ids
    }

    pub fn sum_round(&self, active_delegates: u32, round: u64) -> Result<RoundSums> {
        let mut sums = RoundSums::default();
        if round == 0 {
            return Ok(sums);
        }
        let active = u64::from(active_delegates);
        let first = padded((round - 1) * active + 1);
        let last = padded(round * active);
        let Some(blocks) = self.blocks() else {
            return Ok(sums);
        };
        for block in blocks.range(first..=last).map(|(_, row)| row) {
            sums.fees += BigUint::from(u64_of(block, "totalFee"));
            sums.rewards.push(u64_of(block, "reward"));
            let generator = str_of(block, "generatorPublicKey").ok_or_else(|| {
                ChainError::storage("Stored block without generator public key")
            })?;
            sums.delegates.push(hex::decode(generator)?);
        }
        Ok(sums)
    }
}

fn table_diff(
    table: Table,
    before: &BTreeMap<String, Row>,
    after: &BTreeMap<String, Row>,
    changes: &mut Vec<RowChange>,
) {
    for (key, row) in after {
        if before.get(key) != Some(row) {
            changes.push(RowChange::Put(table, key.clone(), row.clone()));
        }
    }
    for key in before.keys().filter(|key| !after.contains_key(*key)) {
        changes.push(RowChange::Delete(table, key.clone()));
    }
}
