use crate::error::Result;
use crate::storage::db_ops::{row, Assignments, CustomQuery, DbOp, Filter, Row, Table};
use crate::utils::serde_hex;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Ledger account. Every `u_*` field mirrors a confirmed one and tracks the
/// state including unconfirmed pool transactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub address: String,
    #[serde(rename = "publicKey", with = "serde_hex::option")]
    pub public_key: Option<Vec<u8>>,
    #[serde(rename = "secondPublicKey", with = "serde_hex::option")]
    pub second_public_key: Option<Vec<u8>>,
    pub balance: u64,
    pub u_balance: u64,
    #[serde(rename = "secondSignature")]
    pub second_signature: bool,
    #[serde(rename = "u_secondSignature")]
    pub u_second_signature: bool,
    pub username: Option<String>,
    pub u_username: Option<String>,
    #[serde(rename = "isDelegate")]
    pub is_delegate: bool,
    #[serde(rename = "u_isDelegate")]
    pub u_is_delegate: bool,
    pub multimin: u8,
    pub u_multimin: u8,
    pub multilifetime: u8,
    pub u_multilifetime: u8,
    /// Delegate weight: sum of voter balances, refreshed at round end
    pub vote: u64,
    #[serde(rename = "producedblocks")]
    pub produced_blocks: u64,
    #[serde(rename = "missedblocks")]
    pub missed_blocks: u64,
    /// Consecutive missed blocks
    pub cmb: u64,
    pub fees: u64,
    pub rewards: u64,
    #[serde(rename = "blockId")]
    pub block_id: Option<String>,

    /// Delegate public keys (hex) this account votes for
    #[serde(skip)]
    pub delegates: BTreeSet<String>,
    #[serde(skip)]
    pub u_delegates: BTreeSet<String>,
    /// Multisignature member keys (hex)
    #[serde(skip)]
    pub multisignatures: BTreeSet<String>,
    #[serde(skip)]
    pub u_multisignatures: BTreeSet<String>,
}

impl Account {
    pub fn new(address: &str) -> Account {
        Account {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Decodes the scalar columns of a `mem_accounts` row.
    pub fn from_row(row: &Row) -> Result<Account> {
        Ok(serde_json::from_value(Value::Object(row.clone()))?)
    }

    pub fn public_key_hex(&self) -> Option<String> {
        self.public_key.as_ref().map(hex::encode)
    }

    pub fn is_multisignature(&self) -> bool {
        self.multimin > 0 && !self.multisignatures.is_empty()
    }

    pub fn filter(&self) -> Filter {
        Filter::eq("address", self.address.as_str())
    }
}

/// Round bookkeeping attached to confirmed balance changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRef {
    pub block_id: String,
    pub round: u64,
}

/// Ops that shift an account's confirmed and unconfirmed balances.
///
/// The account row is created on first touch. Confirmed changes inside a
/// block also feed the round-local vote deltas.
pub fn merge_balance_diff(
    address: &str,
    balance: impl Into<BigInt>,
    u_balance: impl Into<BigInt>,
    round: Option<&RoundRef>,
) -> Vec<DbOp> {
    let balance = balance.into();
    let set = Assignments::new()
        .add("balance", balance.clone())
        .add("u_balance", u_balance);
    if set.is_empty() {
        return Vec::new();
    }

    let mut ops = vec![
        DbOp::Upsert {
            table: Table::Accounts,
            values: row([("address", address)]),
        },
        DbOp::update(Table::Accounts, Filter::eq("address", address), set),
    ];
    if let Some(round) = round {
        if balance != BigInt::from(0) {
            ops.push(DbOp::Custom(CustomQuery::InsertMemRoundBalance {
                address: address.to_string(),
                amount: balance,
                block_id: round.block_id.clone(),
                round: round.round,
            }));
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_account_decodes_sparse_rows() {
        let row = row([
            ("address", json!("123R")),
            ("balance", json!(50)),
            ("isDelegate", json!(true)),
            ("publicKey", json!("ab".repeat(32))),
        ]);
        let account = Account::from_row(&row).unwrap();
        assert_eq!(account.address, "123R");
        assert_eq!(account.balance, 50);
        assert!(account.is_delegate);
        assert_eq!(account.public_key, Some(vec![0xab; 32]));
        assert_eq!(account.u_balance, 0);
        assert!(account.delegates.is_empty());
    }

    #[test]
    fn test_balance_diff_tracks_round_only_for_confirmed_changes() {
        let round = RoundRef {
            block_id: "1".to_string(),
            round: 1,
        };
        let ops = merge_balance_diff("1R", -10, -10, Some(&round));
        assert_eq!(ops.len(), 3);
        assert!(matches!(
            ops[2],
            DbOp::Custom(CustomQuery::InsertMemRoundBalance { .. })
        ));

        let ops = merge_balance_diff("1R", 0, 10, Some(&round));
        assert_eq!(ops.len(), 2);

        assert!(merge_balance_diff("1R", 0, 0, None).is_empty());
    }
}
