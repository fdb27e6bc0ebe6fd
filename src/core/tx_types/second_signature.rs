use super::{
    account_update, invalid_asset, repeated_senders, TransactionKind, TransactionType, TxContext,
};
use crate::config::{Constants, FeeMilestone};
use crate::core::account::Account;
use crate::core::block::Block;
use crate::core::transaction::{SecondSignatureAsset, Transaction, TransactionAsset};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, Assignments, DbOp, Row, Table};
use crate::utils::{NULL_ADDRESS, PUBLIC_KEY_LENGTH};
use serde_json::Value;

/// Registers a second public key whose signature is required from then on.
pub struct SecondSignatureTransaction;

impl SecondSignatureTransaction {
    fn asset(tx: &Transaction) -> Result<&SecondSignatureAsset> {
        match &tx.asset {
            Some(TransactionAsset::SecondSignature { signature }) => Ok(signature),
            _ => Err(invalid_asset(tx)),
        }
    }
}

impl TransactionType for SecondSignatureTransaction {
    fn kind(&self) -> TransactionKind {
        TransactionKind::SecondSignature
    }

    fn calculate_min_fee(
        &self,
        _tx: &Transaction,
        _sender: &Account,
        fees: &FeeMilestone,
    ) -> Result<u64> {
        Ok(fees.second_signature)
    }

    fn asset_bytes(&self, tx: &Transaction) -> Result<Vec<u8>> {
        Ok(Self::asset(tx)?.public_key.clone())
    }

    fn verify(&self, tx: &Transaction, sender: &Account, _ctx: &TxContext<'_>) -> Result<()> {
        if tx.recipient_id.as_deref() != Some(NULL_ADDRESS) {
            return Err(ChainError::tx("Invalid recipient"));
        }
        if tx.amount != 0 {
            return Err(ChainError::tx("Invalid transaction amount"));
        }
        if Self::asset(tx)?.public_key.len() != PUBLIC_KEY_LENGTH {
            return Err(ChainError::tx("Invalid public key"));
        }
        if sender.second_signature {
            return Err(ChainError::tx("Account already has a second signature"));
        }
        Ok(())
    }

    /// One registration per sender and block.
    fn find_conflicts(&self, txs: &[&Transaction]) -> Vec<String> {
        repeated_senders(txs)
    }

    fn apply(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let key = Self::asset(tx)?.public_key.clone();
        let set = Assignments::new()
            .set("secondSignature", true)
            .set("u_secondSignature", false)
            .set("secondPublicKey", hex::encode(&key))
            .set("blockId", block.id.as_str());
        sender.second_signature = true;
        sender.u_second_signature = false;
        sender.second_public_key = Some(key);
        Ok(vec![account_update(&sender.address, set)])
    }

    fn undo(
        &self,
        _tx: &Transaction,
        _block: &Block,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let set = Assignments::new()
            .set("secondSignature", false)
            .set("u_secondSignature", true)
            .set("secondPublicKey", Value::Null);
        sender.second_signature = false;
        sender.u_second_signature = true;
        sender.second_public_key = None;
        Ok(vec![account_update(&sender.address, set)])
    }

    fn apply_unconfirmed(
        &self,
        _tx: &Transaction,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        if sender.u_second_signature || sender.second_signature {
            return Err(ChainError::tx("Second signature already enabled"));
        }
        sender.u_second_signature = true;
        Ok(vec![account_update(
            &sender.address,
            Assignments::new().set("u_secondSignature", true),
        )])
    }

    fn undo_unconfirmed(
        &self,
        _tx: &Transaction,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        sender.u_second_signature = false;
        Ok(vec![account_update(
            &sender.address,
            Assignments::new().set("u_secondSignature", false),
        )])
    }

    fn object_normalize(&self, tx: Transaction, _constants: &Constants) -> Result<Transaction> {
        let key = &Self::asset(&tx)?.public_key;
        if key.len() != PUBLIC_KEY_LENGTH {
            return Err(ChainError::schema(
                "asset.signature.publicKey",
                format!("Invalid public key length: {}", key.len()),
            ));
        }
        Ok(tx)
    }

    fn db_save(&self, tx: &Transaction) -> Result<Option<DbOp>> {
        let key = hex::encode(&Self::asset(tx)?.public_key);
        Ok(Some(DbOp::Create {
            table: Table::Signatures,
            values: row([("transactionId", tx.id.clone()), ("publicKey", key)]),
        }))
    }

    fn asset_table(&self) -> Option<Table> {
        Some(Table::Signatures)
    }

    fn asset_from_row(&self, row: &Row) -> Result<Option<TransactionAsset>> {
        let Some(key) = row.get("publicKey").and_then(Value::as_str) else {
            return Ok(None);
        };
        Ok(Some(TransactionAsset::SecondSignature {
            signature: SecondSignatureAsset {
                public_key: hex::decode(key)?,
            },
        }))
    }
}
