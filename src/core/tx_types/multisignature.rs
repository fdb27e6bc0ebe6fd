use super::{
    account_update, invalid_asset, relation_ops, repeated_senders, TransactionKind, TransactionType,
    TxContext,
};
use crate::config::{Constants, FeeMilestone};
use crate::core::account::Account;
use crate::core::block::Block;
use crate::core::codec;
use crate::core::transaction::{verify_cosignatures, MultisignatureAsset, Transaction, TransactionAsset};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, Assignments, DbOp, Row, Table};
use crate::utils::{diff, is_valid_public_key_hex, sha256_digest, ByteWriter};
use serde_json::Value;
use std::collections::HashSet;

/// Turns the sender into an m-of-n multisignature account.
pub struct MultisignatureTransaction;

impl MultisignatureTransaction {
    fn asset(tx: &Transaction) -> Result<&MultisignatureAsset> {
        match &tx.asset {
            Some(TransactionAsset::Multisignature { multisignature }) => Ok(multisignature),
            _ => Err(invalid_asset(tx)),
        }
    }

    fn check_bounds(asset: &MultisignatureAsset, constants: &Constants) -> Result<()> {
        let max_keys = constants.multisig_max_keysgroup;
        let keys = asset.keysgroup.len();
        if keys == 0 || keys > max_keys {
            return Err(ChainError::tx(format!(
                "Invalid multisignature keysgroup. Must be between 1 and {max_keys}"
            )));
        }
        if asset.min == 0 || usize::from(asset.min) > keys {
            return Err(ChainError::tx(format!(
                "Invalid multisignature min. Must be between 1 and {keys}"
            )));
        }
        let max_lifetime = constants.multisig_max_lifetime;
        if asset.lifetime == 0 || asset.lifetime > max_lifetime {
            return Err(ChainError::tx(format!(
                "Invalid multisignature lifetime. Must be between 1 and {max_lifetime}"
            )));
        }
        Ok(())
    }

    /// Decoded member keys of the keysgroup.
    fn members(tx: &Transaction, asset: &MultisignatureAsset) -> Result<Vec<Vec<u8>>> {
        let sender = tx.sender_public_key_hex();
        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(asset.keysgroup.len());
        for entry in &asset.keysgroup {
            let key = entry
                .strip_prefix('+')
                .ok_or_else(|| ChainError::tx("Invalid math operator in multisignature keysgroup"))?;
            if !is_valid_public_key_hex(key) {
                return Err(ChainError::tx("Invalid member in keysgroup"));
            }
            if key == sender {
                return Err(ChainError::tx(
                    "Invalid multisignature keysgroup. Can not contain sender",
                ));
            }
            if !seen.insert(key) {
                return Err(ChainError::tx(
                    "Encountered duplicate public key in multisignature keysgroup",
                ));
            }
            members.push(hex::decode(key)?);
        }
        Ok(members)
    }
}

impl TransactionType for MultisignatureTransaction {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Multisignature
    }

    fn calculate_min_fee(
        &self,
        tx: &Transaction,
        _sender: &Account,
        fees: &FeeMilestone,
    ) -> Result<u64> {
        let keys = Self::asset(tx)?.keysgroup.len() as u64;
        Ok((keys + 1) * fees.multisignature)
    }

    fn asset_bytes(&self, tx: &Transaction) -> Result<Vec<u8>> {
        let asset = Self::asset(tx)?;
        let mut writer = ByteWriter::default();
        writer
            .write_byte(asset.min)
            .write_byte(asset.lifetime)
            .write_bytes(asset.keysgroup.concat().as_bytes());
        Ok(writer.into_bytes())
    }

    fn verify(&self, tx: &Transaction, sender: &Account, ctx: &TxContext<'_>) -> Result<()> {
        if tx.recipient_id.is_some() {
            return Err(ChainError::tx("Invalid recipient"));
        }
        if tx.amount != 0 {
            return Err(ChainError::tx("Invalid transaction amount"));
        }
        let asset = Self::asset(tx)?;
        Self::check_bounds(asset, ctx.constants)?;
        if sender.multimin > 0 || !sender.multisignatures.is_empty() {
            return Err(ChainError::tx("Account already has multisignatures enabled"));
        }
        let members = Self::members(tx, asset)?;

        let asset_bytes = self.asset_bytes(tx)?;
        let hash = sha256_digest(&codec::transaction_bytes(tx, &asset_bytes, true, true)?);
        verify_cosignatures(&hash, tx.signatures(), &members)
    }

    /// Every member of the new keysgroup must have co-signed.
    fn ready(&self, tx: &Transaction, _sender: &Account) -> bool {
        Self::asset(tx)
            .map(|asset| tx.signatures().len() >= asset.keysgroup.len())
            .unwrap_or(false)
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
        let asset = Self::asset(tx)?;
        sender.multimin = asset.min;
        sender.multilifetime = asset.lifetime;
        diff::apply(&mut sender.multisignatures, &asset.keysgroup);

        let mut ops = vec![account_update(
            &sender.address,
            Assignments::new()
                .set("multimin", asset.min)
                .set("multilifetime", asset.lifetime)
                .set("blockId", block.id.as_str()),
        )];
        ops.extend(relation_ops(
            Table::Accounts2Multisignatures,
            &sender.address,
            &asset.keysgroup,
        ));
        Ok(ops)
    }

    fn undo(
        &self,
        tx: &Transaction,
        _block: &Block,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let reversed = diff::reverse(&Self::asset(tx)?.keysgroup);
        sender.multimin = 0;
        sender.multilifetime = 0;
        diff::apply(&mut sender.multisignatures, &reversed);

        let mut ops = vec![account_update(
            &sender.address,
            Assignments::new().set("multimin", 0).set("multilifetime", 0),
        )];
        ops.extend(relation_ops(
            Table::Accounts2Multisignatures,
            &sender.address,
            &reversed,
        ));
        Ok(ops)
    }

    fn apply_unconfirmed(
        &self,
        tx: &Transaction,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let asset = Self::asset(tx)?;
        if sender.u_multimin > 0 || !sender.u_multisignatures.is_empty() {
            return Err(ChainError::tx("Signature on this account is pending confirmation"));
        }
        sender.u_multimin = asset.min;
        sender.u_multilifetime = asset.lifetime;
        diff::apply(&mut sender.u_multisignatures, &asset.keysgroup);

        let mut ops = vec![account_update(
            &sender.address,
            Assignments::new()
                .set("u_multimin", asset.min)
                .set("u_multilifetime", asset.lifetime),
        )];
        ops.extend(relation_ops(
            Table::Accounts2UMultisignatures,
            &sender.address,
            &asset.keysgroup,
        ));
        Ok(ops)
    }

    fn undo_unconfirmed(
        &self,
        tx: &Transaction,
        sender: &mut Account,
        _ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let reversed = diff::reverse(&Self::asset(tx)?.keysgroup);
        sender.u_multimin = 0;
        sender.u_multilifetime = 0;
        diff::apply(&mut sender.u_multisignatures, &reversed);

        let mut ops = vec![account_update(
            &sender.address,
            Assignments::new().set("u_multimin", 0).set("u_multilifetime", 0),
        )];
        ops.extend(relation_ops(
            Table::Accounts2UMultisignatures,
            &sender.address,
            &reversed,
        ));
        Ok(ops)
    }

    fn object_normalize(&self, tx: Transaction, constants: &Constants) -> Result<Transaction> {
        let asset = Self::asset(&tx)?;
        Self::check_bounds(asset, constants)
            .map_err(|e| ChainError::schema("asset.multisignature", e.to_string()))?;
        let unique: HashSet<&String> = asset.keysgroup.iter().collect();
        if unique.len() != asset.keysgroup.len() {
            return Err(ChainError::schema(
                "asset.multisignature.keysgroup",
                "Array items are not unique",
            ));
        }
        Ok(tx)
    }

    fn db_save(&self, tx: &Transaction) -> Result<Option<DbOp>> {
        let asset = Self::asset(tx)?;
        Ok(Some(DbOp::Create {
            table: Table::Multisignatures,
            values: row([
                ("transactionId", Value::from(tx.id.as_str())),
                ("min", Value::from(asset.min)),
                ("lifetime", Value::from(asset.lifetime)),
                ("keysgroup", Value::from(asset.keysgroup.join(","))),
            ]),
        }))
    }

    fn asset_table(&self) -> Option<Table> {
        Some(Table::Multisignatures)
    }

    fn asset_from_row(&self, row: &Row) -> Result<Option<TransactionAsset>> {
        let byte = |name: &str| {
            row.get(name)
                .and_then(Value::as_u64)
                .and_then(|v| u8::try_from(v).ok())
        };
        let keysgroup = row.get("keysgroup").and_then(Value::as_str);
        Ok(match (byte("min"), byte("lifetime"), keysgroup) {
            (Some(min), Some(lifetime), Some(keys)) => Some(TransactionAsset::Multisignature {
                multisignature: MultisignatureAsset {
                    min,
                    lifetime,
                    keysgroup: keys.split(',').map(str::to_string).collect(),
                },
            }),
            _ => None,
        })
    }
}
