//! Abstract mutation intents handed to the ledger store.
//!
//! The core never writes state directly: apply/undo paths return `DbOp`s and
//! the store executes a whole list as one atomic batch.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One stored record, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Table {
    Accounts,
    Blocks,
    Transactions,
    SendAssets,
    Signatures,
    Delegates,
    Votes,
    Multisignatures,
    Accounts2Delegates,
    Accounts2UDelegates,
    Accounts2Multisignatures,
    Accounts2UMultisignatures,
    MemRound,
    VotesSnapshot,
}

impl Table {
    pub const ALL: [Table; 14] = [
        Table::Accounts,
        Table::Blocks,
        Table::Transactions,
        Table::SendAssets,
        Table::Signatures,
        Table::Delegates,
        Table::Votes,
        Table::Multisignatures,
        Table::Accounts2Delegates,
        Table::Accounts2UDelegates,
        Table::Accounts2Multisignatures,
        Table::Accounts2UMultisignatures,
        Table::MemRound,
        Table::VotesSnapshot,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Accounts => "mem_accounts",
            Table::Blocks => "blocks",
            Table::Transactions => "trs",
            Table::SendAssets => "send_assets",
            Table::Signatures => "signatures",
            Table::Delegates => "delegates",
            Table::Votes => "votes",
            Table::Multisignatures => "multisignatures",
            Table::Accounts2Delegates => "mem_accounts2delegates",
            Table::Accounts2UDelegates => "mem_accounts2u_delegates",
            Table::Accounts2Multisignatures => "mem_accounts2multisignatures",
            Table::Accounts2UMultisignatures => "mem_accounts2u_multisignatures",
            Table::MemRound => "mem_round",
            Table::VotesSnapshot => "mem_votes_snapshot",
        }
    }

    pub fn from_name(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Columns forming the primary key. Empty means append-only rows.
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Accounts | Table::VotesSnapshot => &["address"],
            Table::Blocks => &["height"],
            Table::Transactions => &["id"],
            Table::SendAssets
            | Table::Signatures
            | Table::Delegates
            | Table::Votes
            | Table::Multisignatures => &["transactionId"],
            Table::Accounts2Delegates
            | Table::Accounts2UDelegates
            | Table::Accounts2Multisignatures
            | Table::Accounts2UMultisignatures => &["accountId", "dependentId"],
            Table::MemRound => &[],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Eq(Value),
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, value: Option<&Value>) -> bool {
        let value = value.unwrap_or(&Value::Null);
        match self {
            Condition::Eq(expected) => expected == value,
            Condition::In(options) => options.iter().any(|o| o == value),
        }
    }
}

/// Conjunction of column conditions; an empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    conditions: BTreeMap<String, Condition>,
}

impl Filter {
    pub fn all() -> Filter {
        Filter::default()
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Filter {
        Filter::all().and_eq(column, value)
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::all().and_in(column, values)
    }

    pub fn and_eq(mut self, column: &str, value: impl Into<Value>) -> Filter {
        self.conditions
            .insert(column.to_string(), Condition::Eq(value.into()));
        self
    }

    pub fn and_in<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        let values = values.into_iter().map(Into::into).collect();
        self.conditions
            .insert(column.to_string(), Condition::In(values));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, condition)| condition.matches(row.get(column)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Set(Value),
    /// `column = column + delta`; missing columns count as zero
    Add(BigInt),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignments(BTreeMap<String, Change>);

impl Assignments {
    pub fn new() -> Assignments {
        Assignments::default()
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Assignments {
        self.0.insert(column.to_string(), Change::Set(value.into()));
        self
    }

    /// Zero deltas are dropped.
    pub fn add(mut self, column: &str, delta: impl Into<BigInt>) -> Assignments {
        let delta = delta.into();
        if delta != BigInt::from(0) {
            self.0.insert(column.to_string(), Change::Add(delta));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&Change> {
        self.0.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Change)> {
        self.0.iter()
    }
}

/// Named, declarative multi-row operations executed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CustomQuery {
    /// Round-local vote delta: +/- the voter's current balance towards `delegate`
    InsertMemRoundVote {
        address: String,
        delegate: String,
        block_id: String,
        round: u64,
        add: bool,
    },
    /// Round-local balance delta towards every delegate `address` votes for
    InsertMemRoundBalance {
        address: String,
        amount: BigInt,
        block_id: String,
        round: u64,
    },
    /// Copies every delegate's current vote weight into the snapshot table
    PerformVotesSnapshot,
    /// Writes the snapshot weights back onto the delegate accounts
    RestoreVotesSnapshot,
    /// Recomputes, from voter balances, the weight of every delegate with
    /// round-local deltas up to `round`, then drops those deltas
    RecalcVotes { round: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DbOp {
    Create {
        table: Table,
        values: Row,
    },
    BulkCreate {
        table: Table,
        values: Vec<Row>,
    },
    Update {
        table: Table,
        filter: Filter,
        set: Assignments,
    },
    Remove {
        table: Table,
        filter: Filter,
    },
    Upsert {
        table: Table,
        values: Row,
    },
    Custom(CustomQuery),
}

impl DbOp {
    pub fn update(table: Table, filter: Filter, set: Assignments) -> DbOp {
        DbOp::Update { table, filter, set }
    }

    pub fn remove(table: Table, filter: Filter) -> DbOp {
        DbOp::Remove { table, filter }
    }

    pub fn table(&self) -> Option<Table> {
        match self {
            DbOp::Create { table, .. }
            | DbOp::BulkCreate { table, .. }
            | DbOp::Update { table, .. }
            | DbOp::Remove { table, .. }
            | DbOp::Upsert { table, .. } => Some(*table),
            DbOp::Custom(_) => None,
        }
    }

    /// Tables executing this op may write to.
    pub fn written_tables(&self) -> Vec<Table> {
        match self {
            DbOp::Custom(CustomQuery::InsertMemRoundVote { .. })
            | DbOp::Custom(CustomQuery::InsertMemRoundBalance { .. }) => vec![Table::MemRound],
            DbOp::Custom(CustomQuery::PerformVotesSnapshot) => vec![Table::VotesSnapshot],
            DbOp::Custom(CustomQuery::RestoreVotesSnapshot) => vec![Table::Accounts],
            DbOp::Custom(CustomQuery::RecalcVotes { .. }) => {
                vec![Table::Accounts, Table::MemRound]
            }
            op => op.table().into_iter().collect(),
        }
    }
}

/// Builds a row from `(column, value)` pairs.
pub fn row<I, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect()
}
