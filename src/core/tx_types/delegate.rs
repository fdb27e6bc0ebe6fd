use super::{account_update, invalid_asset, TransactionKind, TransactionType, TxContext};
use crate::config::{Constants, FeeMilestone};
use crate::core::account::Account;
use crate::core::block::Block;
use crate::core::transaction::{DelegateAsset, Transaction, TransactionAsset};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, Assignments, DbOp, Filter, Row, Table};
use crate::utils::is_valid_address;
use serde_json::Value;
use std::collections::HashSet;

const MAX_USERNAME_LENGTH: usize = 20;

/// Registers the sender as a forging candidate under a unique username.
pub struct DelegateTransaction;

impl DelegateTransaction {
    fn asset(tx: &Transaction) -> Result<&DelegateAsset> {
        match &tx.asset {
            Some(TransactionAsset::Delegate { delegate }) => Ok(delegate),
            _ => Err(invalid_asset(tx)),
        }
    }

    fn check_username(username: &str) -> Result<()> {
        if username.is_empty() || username.trim() != username {
            return Err(ChainError::tx("Empty or padded username"));
        }
        if username.to_lowercase() != username {
            return Err(ChainError::tx("Username must be lowercase"));
        }
        if username.len() > MAX_USERNAME_LENGTH {
            return Err(ChainError::tx(format!(
                "Username is too long. Maximum is {MAX_USERNAME_LENGTH} characters"
            )));
        }
        if is_valid_address(&username.to_uppercase()) {
            return Err(ChainError::tx("Username can not be a potential address"));
        }
        let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || "!@$&_.".contains(c);
        if !username.chars().all(allowed) {
            return Err(ChainError::tx(
                "Username can only contain alphanumeric characters with the exception of !@$&_.",
            ));
        }
        Ok(())
    }

    fn taken_by_other(
        ctx: &TxContext<'_>,
        column: &str,
        username: &str,
        address: &str,
    ) -> Result<bool> {
        let holders = ctx.store.find_accounts(&Filter::eq(column, username))?;
        Ok(holders.iter().any(|a| a.address != address))
    }
}

impl TransactionType for DelegateTransaction {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Delegate
    }

    fn calculate_min_fee(
        &self,
        _tx: &Transaction,
        _sender: &Account,
        fees: &FeeMilestone,
    ) -> Result<u64> {
        Ok(fees.delegate)
    }

    fn asset_bytes(&self, tx: &Transaction) -> Result<Vec<u8>> {
        Ok(Self::asset(tx)?.username.as_bytes().to_vec())
    }

    fn verify(&self, tx: &Transaction, sender: &Account, ctx: &TxContext<'_>) -> Result<()> {
        if tx.recipient_id.is_some() {
            return Err(ChainError::tx("Invalid recipient"));
        }
        if tx.amount != 0 {
            return Err(ChainError::tx("Invalid transaction amount"));
        }
        let asset = Self::asset(tx)?;
        if asset.public_key != tx.sender_public_key_hex() {
            return Err(ChainError::tx("Invalid delegate public key"));
        }
        Self::check_username(&asset.username)?;
        if sender.is_delegate {
            return Err(ChainError::tx("Account is already a delegate"));
        }
        if Self::taken_by_other(ctx, "username", &asset.username, &sender.address)? {
            return Err(ChainError::tx("Username already exists"));
        }
        Ok(())
    }

    /// A username or a sender may register only once per block.
    fn find_conflicts(&self, txs: &[&Transaction]) -> Vec<String> {
        let mut usernames = HashSet::new();
        let mut senders = HashSet::new();
        txs.iter()
            .filter(|tx| {
                let username = Self::asset(tx).map(|asset| asset.username.as_str()).ok();
                let fresh_name = username.map_or(true, |name| usernames.insert(name));
                let fresh_sender = senders.insert(tx.sender_id.as_str());
                !(fresh_name && fresh_sender)
            })
            .map(|tx| tx.id.clone())
            .collect()
    }

    fn apply(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let username = Self::asset(tx)?.username.clone();
        sender.is_delegate = true;
        sender.u_is_delegate = true;
        sender.username = Some(username.clone());
        sender.u_username = Some(username.clone());
        sender.vote = 0;
        let set = Assignments::new()
            .set("isDelegate", true)
            .set("u_isDelegate", true)
            .set("username", username.as_str())
            .set("u_username", username.as_str())
            .set("vote", 0)
            .set("blockId", block.id.as_str());
        Ok(vec![account_update(&sender.address, set)])
    }

    fn undo(
        &self,
        _tx: &Transaction,
        _block: &Block,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        sender.is_delegate = false;
        sender.username = None;
        let set = Assignments::new()
            .set("isDelegate", false)
            .set("username", Value::Null);
        Ok(vec![account_update(&sender.address, set)])
    }

    fn apply_unconfirmed(
        &self,
        tx: &Transaction,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let username = Self::asset(tx)?.username.clone();
        if sender.u_is_delegate {
            return Err(ChainError::tx("Account is already a delegate"));
        }
        if Self::taken_by_other(ctx, "u_username", &username, &sender.address)? {
            return Err(ChainError::tx("Username already exists"));
        }
        sender.u_is_delegate = true;
        sender.u_username = Some(username.clone());
        Ok(vec![account_update(
            &sender.address,
            Assignments::new()
                .set("u_isDelegate", true)
                .set("u_username", username),
        )])
    }

    fn undo_unconfirmed(
        &self,
        _tx: &Transaction,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        sender.u_is_delegate = false;
        sender.u_username = None;
        Ok(vec![account_update(
            &sender.address,
            Assignments::new()
                .set("u_isDelegate", false)
                .set("u_username", Value::Null),
        )])
    }

    fn object_normalize(&self, tx: Transaction, _constants: &Constants) -> Result<Transaction> {
        let asset = Self::asset(&tx)?;
        if asset.username.is_empty() || asset.username.len() > MAX_USERNAME_LENGTH {
            return Err(ChainError::schema(
                "asset.delegate.username",
                format!("Invalid username length: {}", asset.username.len()),
            ));
        }
        Ok(tx)
    }

    fn db_save(&self, tx: &Transaction) -> Result<Option<DbOp>> {
        let asset = Self::asset(tx)?;
        Ok(Some(DbOp::Create {
            table: Table::Delegates,
            values: row([
                ("transactionId", tx.id.as_str()),
                ("username", asset.username.as_str()),
                ("publicKey", asset.public_key.as_str()),
            ]),
        }))
    }

    fn asset_table(&self) -> Option<Table> {
        Some(Table::Delegates)
    }

    fn asset_from_row(&self, row: &Row) -> Result<Option<TransactionAsset>> {
        let field = |name: &str| row.get(name).and_then(Value::as_str).map(str::to_string);
        Ok(match (field("username"), field("publicKey")) {
            (Some(username), Some(public_key)) => Some(TransactionAsset::Delegate {
                delegate: DelegateAsset {
                    username,
                    public_key,
                },
            }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ledger::LedgerStore;
    use crate::storage::memory::MemoryLedger;

    fn registration(username: &str) -> Transaction {
        registration_from(4, username)
    }

    fn registration_from(key_byte: u8, username: &str) -> Transaction {
        let sender_public_key = vec![key_byte; 32];
        Transaction {
            id: format!("{key_byte}{username}"),
            sender_id: format!("{key_byte}R"),
            tx_type: TransactionKind::Delegate as u8,
            asset: Some(TransactionAsset::Delegate {
                delegate: DelegateAsset {
                    username: username.to_string(),
                    public_key: hex::encode(&sender_public_key),
                },
            }),
            sender_public_key,
            ..Default::default()
        }
    }

    #[test]
    fn test_username_rules() {
        assert!(DelegateTransaction::check_username("genesis_1").is_ok());
        assert!(DelegateTransaction::check_username("Upper").is_err());
        assert!(DelegateTransaction::check_username("").is_err());
        assert!(DelegateTransaction::check_username(" pad").is_err());
        assert!(DelegateTransaction::check_username(&"a".repeat(21)).is_err());
        assert!(DelegateTransaction::check_username("1234r").is_err());
        assert!(DelegateTransaction::check_username("semi;colon").is_err());
    }

    #[test]
    fn test_username_must_be_unique() {
        let constants = Constants::default();
        let mut store = MemoryLedger::new();
        store
            .apply_ops(&[DbOp::Create {
                table: Table::Accounts,
                values: row([("address", "2R"), ("username", "taken")]),
            }])
            .unwrap();
        let ctx = TxContext::new(&constants, &store, 2);
        let sender = Account::new("1R");

        assert!(DelegateTransaction
            .verify(&registration("free"), &sender, &ctx)
            .is_ok());
        assert_eq!(
            DelegateTransaction.verify(&registration("taken"), &sender, &ctx),
            Err(ChainError::tx("Username already exists"))
        );
    }

    #[test]
    fn test_apply_undo_symmetry() {
        let constants = Constants::default();
        let store = MemoryLedger::new();
        let ctx = TxContext::new(&constants, &store, 2);
        let mut sender = Account::new("1R");
        let tx = registration("bob");

        DelegateTransaction
            .apply_unconfirmed(&tx, &mut sender, &ctx)
            .unwrap();
        DelegateTransaction
            .apply(&tx, &Block::default(), &mut sender, &ctx)
            .unwrap();
        assert!(sender.is_delegate);
        assert_eq!(sender.username.as_deref(), Some("bob"));

        DelegateTransaction
            .undo(&tx, &Block::default(), &mut sender, &ctx)
            .unwrap();
        DelegateTransaction
            .undo_unconfirmed(&tx, &mut sender, &ctx)
            .unwrap();
        assert_eq!(sender, Account::new("1R"));
    }

    #[test]
    fn test_repeated_username_or_sender_conflicts() {
        let first = registration_from(1, "alice");
        let same_name = registration_from(2, "alice");
        let same_sender = registration_from(1, "carol");
        let other = registration_from(3, "dave");

        let txs = [&first, &same_name, &same_sender, &other];
        assert_eq!(
            DelegateTransaction.find_conflicts(&txs),
            vec![same_name.id.clone(), same_sender.id.clone()]
        );
        assert!(DelegateTransaction.find_conflicts(&[&first, &other]).is_empty());
    }
}
