use crate::config::Constants;
use crate::consensus::rounds::calc_round;
use crate::core::account::{merge_balance_diff, Account, RoundRef};
use crate::core::block::Block;
use crate::core::codec;
use crate::core::fee_schedule::FeeSchedule;
use crate::core::tx_types::{TransactionRegistry, TransactionType, TxContext};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, DbOp, Filter, Row, Table};
use crate::storage::ledger::LedgerStore;
use crate::utils::{
    derive_address, id_from_bytes, is_valid_address, serde_hex, sha256_digest, verify_signature,
    Keypair, HASH_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
use log::trace;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondSignatureAsset {
    #[serde(rename = "publicKey", with = "hex::serde")]
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateAsset {
    pub username: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisignatureAsset {
    pub min: u8,
    pub lifetime: u8,
    /// `+<hex public key>` entries
    pub keysgroup: Vec<String>,
}

/// Type-specific payload. Variants are tried in declaration order when
/// decoding, so the most specific shapes come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionAsset {
    Vote { votes: Vec<String> },
    Multisignature { multisignature: MultisignatureAsset },
    Delegate { delegate: DelegateAsset },
    SecondSignature { signature: SecondSignatureAsset },
    Send { data: String },
    Other(Map<String, Value>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub tx_type: u8,
    /// Seconds since the chain epoch
    pub timestamp: i32,
    #[serde(with = "hex::serde")]
    pub sender_public_key: Vec<u8>,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub amount: u64,
    pub fee: u64,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_hex::option")]
    pub sign_signature: Option<Vec<u8>>,
    /// Co-signatures collected from multisignature members
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_hex::list")]
    pub signatures: Option<Vec<Vec<u8>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<TransactionAsset>,
}

impl Transaction {
    pub fn sender_public_key_hex(&self) -> String {
        hex::encode(&self.sender_public_key)
    }

    pub fn signatures(&self) -> &[Vec<u8>] {
        self.signatures.as_deref().unwrap_or(&[])
    }

    /// amount + fee
    pub fn total_spend(&self) -> Result<u64> {
        self.amount
            .checked_add(self.fee)
            .ok_or_else(|| ChainError::tx(format!("Amount overflow in transaction {}", self.id)))
    }
}

/// Transport form of a transaction: every field optional, numbers signed and
/// binary fields hex-encoded, as received from peers or clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: Option<i64>,
    pub timestamp: Option<i64>,
    pub sender_public_key: Option<String>,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub amount: Option<i64>,
    pub fee: Option<i64>,
    pub signature: Option<String>,
    pub sign_signature: Option<String>,
    pub signatures: Option<Vec<String>>,
    pub asset: Option<TransactionAsset>,
}

impl From<&Transaction> for RawTransaction {
    fn from(tx: &Transaction) -> Self {
        RawTransaction {
            id: Some(tx.id.clone()).filter(|id| !id.is_empty()),
            tx_type: Some(i64::from(tx.tx_type)),
            timestamp: Some(i64::from(tx.timestamp)),
            sender_public_key: Some(hex::encode(&tx.sender_public_key)),
            sender_id: Some(tx.sender_id.clone()).filter(|id| !id.is_empty()),
            recipient_id: tx.recipient_id.clone(),
            amount: i64::try_from(tx.amount).ok(),
            fee: i64::try_from(tx.fee).ok(),
            signature: Some(hex::encode(&tx.signature)),
            sign_signature: tx.sign_signature.as_ref().map(hex::encode),
            signatures: tx
                .signatures
                .as_ref()
                .map(|list| list.iter().map(hex::encode).collect()),
            asset: tx.asset.clone(),
        }
    }
}

fn required<T>(field: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| ChainError::schema(field, format!("Missing required property: {field}")))
}

/// Decodes a hex field of an exact byte length.
pub(crate) fn hex_field(field: &str, value: &str, len: usize) -> Result<Vec<u8>> {
    let bytes = hex::decode(value)
        .map_err(|_| ChainError::schema(field, format!("Object didn't pass validation for format hex: {value}")))?;
    if bytes.len() != len {
        return Err(ChainError::schema(
            field,
            format!("Invalid {field} length: expected {len} bytes, got {}", bytes.len()),
        ));
    }
    Ok(bytes)
}

pub(crate) fn check_id_format(field: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 20 {
        return Err(ChainError::schema(
            field,
            format!("String is too long ({} chars), maximum 20", id.len()),
        ));
    }
    if !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChainError::schema(
            field,
            format!("Object didn't pass validation for format id: {id}"),
        ));
    }
    Ok(())
}

fn amount_field(field: &str, value: i64, maximum: u64) -> Result<u64> {
    let value = u64::try_from(value)
        .map_err(|_| ChainError::schema(field, format!("Value {value} is less than minimum 0")))?;
    if value > maximum {
        return Err(ChainError::schema(
            field,
            format!("Value {value} is greater than maximum {maximum}"),
        ));
    }
    Ok(value)
}

/// Every co-signature must verify against a distinct member key.
pub fn verify_cosignatures(hash: &[u8], signatures: &[Vec<u8>], members: &[Vec<u8>]) -> Result<()> {
    let mut seen: HashSet<&[u8]> = HashSet::new();
    let mut used: HashSet<usize> = HashSet::new();
    for signature in signatures {
        if !seen.insert(signature.as_slice()) {
            return Err(ChainError::tx("Encountered duplicate signature in transaction"));
        }
        let signer = members
            .iter()
            .enumerate()
            .position(|(i, key)| !used.contains(&i) && verify_signature(hash, signature, key));
        match signer {
            Some(i) => {
                used.insert(i);
            }
            None => return Err(ChainError::tx("Failed to verify multisignature")),
        }
    }
    Ok(())
}

/// Type-independent transaction rules; type-specific behavior is dispatched
/// through the registry.
pub struct TransactionLogic {
    registry: TransactionRegistry,
    constants: Arc<Constants>,
    fees: FeeSchedule,
}

impl TransactionLogic {
    pub fn new(constants: Arc<Constants>, registry: TransactionRegistry) -> TransactionLogic {
        TransactionLogic {
            fees: FeeSchedule::new(&constants),
            registry,
            constants,
        }
    }

    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    fn handler(&self, tx_type: u8) -> Result<&dyn TransactionType> {
        self.registry
            .get(tx_type)
            .ok_or_else(|| ChainError::tx(format!("Unknown transaction type {tx_type}")))
    }

    pub fn get_bytes(
        &self,
        tx: &Transaction,
        skip_signature: bool,
        skip_second_signature: bool,
    ) -> Result<Vec<u8>> {
        let asset = self.handler(tx.tx_type)?.asset_bytes(tx)?;
        codec::transaction_bytes(tx, &asset, skip_signature, skip_second_signature)
    }

    pub fn get_hash(
        &self,
        tx: &Transaction,
        skip_signature: bool,
        skip_second_signature: bool,
    ) -> Result<[u8; HASH_LENGTH]> {
        Ok(sha256_digest(&self.get_bytes(
            tx,
            skip_signature,
            skip_second_signature,
        )?))
    }

    pub fn get_id(&self, tx: &Transaction) -> Result<String> {
        Ok(id_from_bytes(&self.get_bytes(tx, false, false)?))
    }

    pub fn sign(&self, keypair: &Keypair, tx: &Transaction) -> Result<Vec<u8>> {
        Ok(keypair.sign(&self.get_hash(tx, true, true)?))
    }

    /// Covers the bytes including the first signature.
    pub fn second_sign(&self, keypair: &Keypair, tx: &Transaction) -> Result<Vec<u8>> {
        Ok(keypair.sign(&self.get_hash(tx, false, true)?))
    }

    pub fn multisign(&self, keypair: &Keypair, tx: &Transaction) -> Result<Vec<u8>> {
        self.sign(keypair, tx)
    }

    pub fn verify_signature(
        &self,
        tx: &Transaction,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let hash = self.get_hash(tx, true, true)?;
        Ok(verify_signature(&hash, signature, public_key))
    }

    pub fn verify_second_signature(
        &self,
        tx: &Transaction,
        public_key: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let hash = self.get_hash(tx, false, true)?;
        Ok(verify_signature(&hash, signature, public_key))
    }

    /// Fills in sender fields, signatures and id of a draft transaction.
    pub fn create(
        &self,
        keypair: &Keypair,
        second_keypair: Option<&Keypair>,
        mut tx: Transaction,
    ) -> Result<Transaction> {
        tx.sender_public_key = keypair.public_key().to_vec();
        tx.sender_id = keypair.address();
        tx.signature = Vec::new();
        tx.sign_signature = None;
        tx.signature = self.sign(keypair, &tx)?;
        if let Some(second) = second_keypair {
            tx.sign_signature = Some(self.second_sign(second, &tx)?);
        }
        tx.id = self.get_id(&tx)?;
        Ok(tx)
    }

    pub fn min_fee(&self, tx: &Transaction, sender: &Account, height: u32) -> Result<u64> {
        self.handler(tx.tx_type)?
            .calculate_min_fee(tx, sender, &self.fees.at(height))
    }

    pub fn ready(&self, tx: &Transaction, sender: &Account) -> Result<bool> {
        Ok(self.handler(tx.tx_type)?.ready(tx, sender))
    }

    /// Ids of block transactions that clash with an earlier one in `txs`,
    /// such as a second registration of the same username.
    pub fn find_conflicts(&self, txs: &[Transaction]) -> Result<Vec<String>> {
        let mut by_kind: BTreeMap<u8, Vec<&Transaction>> = BTreeMap::new();
        for tx in txs {
            by_kind.entry(tx.tx_type).or_default().push(tx);
        }
        let mut conflicts = Vec::new();
        for (tx_type, group) in &by_kind {
            conflicts.extend(self.handler(*tx_type)?.find_conflicts(group));
        }
        Ok(conflicts)
    }

    /// Stateless and account-dependent checks against the current ledger.
    pub fn verify(
        &self,
        tx: &Transaction,
        sender: Option<&Account>,
        ctx: &TxContext<'_>,
    ) -> Result<()> {
        let handler = self.handler(tx.tx_type)?;
        let sender = sender.ok_or_else(|| ChainError::tx("Missing sender"))?;

        if let Some(key) = &sender.public_key {
            if key != &tx.sender_public_key {
                return Err(ChainError::tx("Invalid sender public key"));
            }
        }
        if derive_address(&tx.sender_public_key) != tx.sender_id
            || sender.address != tx.sender_id
        {
            return Err(ChainError::tx("Invalid sender address"));
        }

        let total = self.constants.total_amount;
        if tx.amount > total || tx.fee > total {
            return Err(ChainError::tx("Invalid transaction amount"));
        }

        let min_fee = handler.calculate_min_fee(tx, sender, &self.fees.at(ctx.height))?;
        if tx.fee < min_fee {
            return Err(ChainError::InsufficientFee {
                required: min_fee,
                provided: tx.fee,
            });
        }

        if !self.verify_signature(tx, &tx.sender_public_key, &tx.signature)? {
            return Err(ChainError::tx("Failed to verify signature"));
        }

        match (&sender.second_public_key, &tx.sign_signature) {
            (Some(_), None) if sender.second_signature => {
                return Err(ChainError::tx("Missing sender second signature"));
            }
            (Some(key), Some(sign)) if sender.second_signature => {
                if !self.verify_second_signature(tx, key, sign)? {
                    return Err(ChainError::tx("Failed to verify second signature"));
                }
            }
            (_, Some(_)) => {
                return Err(ChainError::tx("Sender does not have a second signature"));
            }
            _ => {}
        }

        if sender.is_multisignature() {
            let members: Vec<Vec<u8>> = sender
                .multisignatures
                .iter()
                .filter_map(|key| hex::decode(key).ok())
                .collect();
            self.verify_cosignatures(tx, &members)?;
        }

        if self.get_id(tx)? != tx.id {
            return Err(ChainError::tx("Invalid transaction id"));
        }

        handler.verify(tx, sender, ctx)
    }

    pub fn verify_cosignatures(&self, tx: &Transaction, members: &[Vec<u8>]) -> Result<()> {
        let hash = self.get_hash(tx, true, true)?;
        verify_cosignatures(&hash, tx.signatures(), members)
    }

    fn check_balance(address: &str, available: u64, required: u64) -> Result<()> {
        if available < required {
            return Err(ChainError::InsufficientFunds {
                address: address.to_string(),
                required,
                available,
            });
        }
        Ok(())
    }

    /// Confirms the transaction inside `block`. Genesis transactions mint
    /// their amounts instead of debiting the sender.
    pub fn apply(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let handler = self.handler(tx.tx_type)?;
        if !handler.ready(tx, sender) {
            return Err(ChainError::tx(format!("Transaction is not ready: {}", tx.id)));
        }

        let mut ops = Vec::new();
        if sender.public_key.is_none() {
            sender.public_key = Some(tx.sender_public_key.clone());
            ops.push(DbOp::Upsert {
                table: Table::Accounts,
                values: row([
                    ("address", sender.address.clone()),
                    ("publicKey", tx.sender_public_key_hex()),
                ]),
            });
        }

        if block.height != 1 {
            let amount = tx.total_spend()?;
            Self::check_balance(&sender.address, sender.balance, amount)?;
            sender.balance -= amount;
            let round = RoundRef {
                block_id: block.id.clone(),
                round: calc_round(block.height, self.constants.active_delegates),
            };
            ops.extend(merge_balance_diff(
                &sender.address,
                -BigInt::from(amount),
                0,
                Some(&round),
            ));
        }

        ops.extend(handler.apply(tx, block, sender, ctx)?);
        trace!("Applied transaction {} in block {}", tx.id, block.id);
        Ok(ops)
    }

    pub fn undo(
        &self,
        tx: &Transaction,
        block: &Block,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let handler = self.handler(tx.tx_type)?;
        let mut ops = Vec::new();
        if block.height != 1 {
            let amount = tx.total_spend()?;
            sender.balance = sender
                .balance
                .checked_add(amount)
                .ok_or_else(|| ChainError::tx("Balance overflow"))?;
            let round = RoundRef {
                block_id: block.id.clone(),
                round: calc_round(block.height, self.constants.active_delegates),
            };
            ops.extend(merge_balance_diff(&sender.address, amount, 0, Some(&round)));
        }
        ops.extend(handler.undo(tx, block, sender, ctx)?);
        Ok(ops)
    }

    pub fn apply_unconfirmed(
        &self,
        tx: &Transaction,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let handler = self.handler(tx.tx_type)?;
        let mut ops = Vec::new();
        if ctx.height != 1 {
            let amount = tx.total_spend()?;
            Self::check_balance(&sender.address, sender.u_balance, amount)?;
            sender.u_balance -= amount;
            ops.extend(merge_balance_diff(
                &sender.address,
                0,
                -BigInt::from(amount),
                None,
            ));
        }
        ops.extend(handler.apply_unconfirmed(tx, sender, ctx)?);
        Ok(ops)
    }

    pub fn undo_unconfirmed(
        &self,
        tx: &Transaction,
        sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let handler = self.handler(tx.tx_type)?;
        let mut ops = Vec::new();
        if ctx.height != 1 {
            let amount = tx.total_spend()?;
            sender.u_balance = sender
                .u_balance
                .checked_add(amount)
                .ok_or_else(|| ChainError::tx("Balance overflow"))?;
            ops.extend(merge_balance_diff(&sender.address, 0, amount, None));
        }
        ops.extend(handler.undo_unconfirmed(tx, sender, ctx)?);
        Ok(ops)
    }

    /// Rows for the transactions of a block plus their asset rows.
    pub fn db_save(&self, txs: &[Transaction], block_id: &str, height: u32) -> Result<Vec<DbOp>> {
        if txs.is_empty() {
            return Ok(Vec::new());
        }
        let mut rows = Vec::with_capacity(txs.len());
        let mut asset_ops = Vec::new();
        for (index, tx) in txs.iter().enumerate() {
            let Value::Object(mut values) = serde_json::to_value(tx)? else {
                return Err(ChainError::Serialization(format!(
                    "Transaction {} did not serialize to an object",
                    tx.id
                )));
            };
            values.remove("asset");
            values.insert("blockId".to_string(), Value::from(block_id));
            values.insert("height".to_string(), Value::from(height));
            values.insert("blockIndex".to_string(), Value::from(index));
            rows.push(values);

            if let Some(op) = self.handler(tx.tx_type)?.db_save(tx)? {
                asset_ops.push(op);
            }
        }
        let mut ops = vec![DbOp::BulkCreate {
            table: Table::Transactions,
            values: rows,
        }];
        ops.extend(asset_ops);
        Ok(ops)
    }

    /// Removes the stored rows of `txs` and their assets.
    pub fn db_remove(&self, txs: &[Transaction]) -> Vec<DbOp> {
        if txs.is_empty() {
            return Vec::new();
        }
        let ids: Vec<&str> = txs.iter().map(|tx| tx.id.as_str()).collect();
        let mut ops = vec![DbOp::remove(
            Table::Transactions,
            Filter::is_in("id", ids.iter().copied()),
        )];
        let tables: std::collections::BTreeSet<Table> = txs
            .iter()
            .filter_map(|tx| self.registry.get(tx.tx_type)?.asset_table())
            .collect();
        for table in tables {
            ops.push(DbOp::remove(
                table,
                Filter::is_in("transactionId", ids.iter().copied()),
            ));
        }
        ops
    }

    /// Decodes a stored `trs` row; the asset is attached separately.
    pub fn from_row(row: &Row) -> Result<Transaction> {
        Ok(serde_json::from_value(Value::Object(row.clone()))?)
    }

    /// Loads the asset rows of `txs` from their per-type tables.
    pub fn attach_assets(&self, txs: &mut [Transaction], store: &dyn LedgerStore) -> Result<()> {
        let mut by_type: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
        for (i, tx) in txs.iter().enumerate() {
            by_type.entry(tx.tx_type).or_default().push(i);
        }
        for (tx_type, indexes) in by_type {
            let handler = self.handler(tx_type)?;
            let Some(table) = handler.asset_table() else {
                continue;
            };
            let ids = indexes.iter().map(|i| txs[*i].id.clone());
            let rows = store.find_rows(table, &Filter::is_in("transactionId", ids))?;
            let rows: BTreeMap<String, Row> = rows
                .into_iter()
                .filter_map(|r| {
                    let id = r.get("transactionId")?.as_str()?.to_string();
                    Some((id, r))
                })
                .collect();
            for i in indexes {
                if let Some(asset_row) = rows.get(&txs[i].id) {
                    txs[i].asset = handler.asset_from_row(asset_row)?;
                }
            }
        }
        Ok(())
    }

    /// Validates the transport form and converts it into a typed transaction.
    pub fn object_normalize(&self, raw: RawTransaction) -> Result<Transaction> {
        let tx_type = required("type", raw.tx_type)?;
        let tx_type = u8::try_from(tx_type)
            .map_err(|_| ChainError::schema("type", format!("Invalid transaction type {tx_type}")))?;
        let handler = self.handler(tx_type)?;

        let timestamp = required("timestamp", raw.timestamp)?;
        let timestamp = i32::try_from(timestamp)
            .map_err(|_| ChainError::schema("timestamp", format!("Value {timestamp} is out of range")))?;
        let sender_public_key = hex_field(
            "senderPublicKey",
            &required("senderPublicKey", raw.sender_public_key)?,
            PUBLIC_KEY_LENGTH,
        )?;
        let signature = hex_field(
            "signature",
            &required("signature", raw.signature)?,
            SIGNATURE_LENGTH,
        )?;
        let sign_signature = raw
            .sign_signature
            .map(|s| hex_field("signSignature", &s, SIGNATURE_LENGTH))
            .transpose()?;
        let signatures = raw
            .signatures
            .map(|list| {
                list.iter()
                    .map(|s| hex_field("signatures", s, SIGNATURE_LENGTH))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let total = self.constants.total_amount;
        let amount = amount_field("amount", raw.amount.unwrap_or(0), total)?;
        let fee = amount_field("fee", raw.fee.unwrap_or(0), total)?;

        let sender_id = match raw.sender_id {
            Some(id) if !is_valid_address(&id) => {
                return Err(ChainError::schema(
                    "senderId",
                    format!("Object didn't pass validation for format address: {id}"),
                ))
            }
            Some(id) => id,
            None => derive_address(&sender_public_key),
        };
        if let Some(recipient) = &raw.recipient_id {
            if !is_valid_address(recipient) {
                return Err(ChainError::schema(
                    "recipientId",
                    format!("Object didn't pass validation for format address: {recipient}"),
                ));
            }
        }
        if let Some(id) = &raw.id {
            check_id_format("id", id)?;
        }

        let tx = Transaction {
            id: raw.id.unwrap_or_default(),
            tx_type,
            timestamp,
            sender_public_key,
            sender_id,
            recipient_id: raw.recipient_id,
            amount,
            fee,
            signature,
            sign_signature,
            signatures,
            asset: raw.asset,
        };
        let tx = handler.object_normalize(tx, &self.constants)?;
        if tx.id.is_empty() {
            let id = self.get_id(&tx)?;
            return Ok(Transaction { id, ..tx });
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tx_types::TransactionKind;
    use crate::storage::memory::MemoryLedger;

    fn logic() -> TransactionLogic {
        let constants = Arc::new(Constants::default());
        TransactionLogic::new(constants, TransactionRegistry::with_defaults())
    }

    fn send(logic: &TransactionLogic, keypair: &Keypair, amount: u64) -> Transaction {
        logic
            .create(
                keypair,
                None,
                Transaction {
                    tx_type: TransactionKind::Send as u8,
                    timestamp: 0,
                    recipient_id: Some("58191285901858109R".to_string()),
                    amount,
                    fee: 10_000_000,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    fn funded(keypair: &Keypair, balance: u64) -> Account {
        Account {
            address: keypair.address(),
            public_key: Some(keypair.public_key().to_vec()),
            balance,
            u_balance: balance,
            ..Default::default()
        }
    }

    #[test]
    fn test_signatures_cover_the_right_bytes() {
        let logic = logic();
        let kp = Keypair::from_secret("sender").unwrap();
        let second = Keypair::from_secret("second").unwrap();
        let mut tx = send(&logic, &kp, 100);
        assert!(logic
            .verify_signature(&tx, kp.public_key(), &tx.signature)
            .unwrap());

        tx.sign_signature = Some(logic.second_sign(&second, &tx).unwrap());
        assert!(logic
            .verify_signature(&tx, kp.public_key(), &tx.signature)
            .unwrap());
        let sign = tx.sign_signature.clone().unwrap();
        assert!(logic
            .verify_second_signature(&tx, second.public_key(), &sign)
            .unwrap());

        tx.amount += 1;
        assert!(!logic
            .verify_signature(&tx, kp.public_key(), &tx.signature)
            .unwrap());
    }

    #[test]
    fn test_verify_accepts_valid_send() {
        let logic = logic();
        let store = MemoryLedger::new();
        let kp = Keypair::from_secret("sender").unwrap();
        let tx = send(&logic, &kp, 100);
        let ctx = TxContext::new(logic.constants(), &store, 2);
        logic.verify(&tx, Some(&funded(&kp, 1_000_000_000)), &ctx).unwrap();
        assert!(logic.verify(&tx, None, &ctx).is_err());
    }

    #[test]
    fn test_verify_rejects_low_fee_and_tampering() {
        let logic = logic();
        let store = MemoryLedger::new();
        let kp = Keypair::from_secret("sender").unwrap();
        let ctx = TxContext::new(logic.constants(), &store, 2);
        let sender = funded(&kp, 1_000_000_000);

        let mut cheap = send(&logic, &kp, 100);
        cheap.fee = 1;
        let cheap = logic.create(&kp, None, cheap).unwrap();
        assert!(matches!(
            logic.verify(&cheap, Some(&sender), &ctx),
            Err(ChainError::InsufficientFee { .. })
        ));

        let mut forged = send(&logic, &kp, 100);
        forged.amount = 200;
        assert_eq!(
            logic.verify(&forged, Some(&sender), &ctx),
            Err(ChainError::tx("Failed to verify signature"))
        );
    }

    #[test]
    fn test_apply_then_undo_restores_sender() {
        let logic = logic();
        let store = MemoryLedger::new();
        let kp = Keypair::from_secret("sender").unwrap();
        let tx = send(&logic, &kp, 100);
        let block = Block {
            id: "1".to_string(),
            height: 2,
            ..Default::default()
        };
        let ctx = TxContext::new(logic.constants(), &store, 2);
        let mut sender = funded(&kp, 10_000_100);
        let before = sender.clone();

        logic.apply_unconfirmed(&tx, &mut sender, &ctx).unwrap();
        logic.apply(&tx, &block, &mut sender, &ctx).unwrap();
        assert_eq!(sender.balance, 0);
        assert_eq!(sender.u_balance, 0);

        logic.undo(&tx, &block, &mut sender, &ctx).unwrap();
        logic.undo_unconfirmed(&tx, &mut sender, &ctx).unwrap();
        assert_eq!(sender, before);

        let mut poor = funded(&kp, 10);
        assert!(matches!(
            logic.apply_unconfirmed(&tx, &mut poor, &ctx),
            Err(ChainError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_object_normalize_fills_id_and_rejects_negative_amount() {
        let logic = logic();
        let kp = Keypair::from_secret("sender").unwrap();
        let tx = send(&logic, &kp, 100);

        let mut raw = RawTransaction::from(&tx);
        raw.id = None;
        raw.sender_id = None;
        assert_eq!(logic.object_normalize(raw).unwrap(), tx);

        let mut raw = RawTransaction::from(&tx);
        raw.amount = Some(-1);
        assert!(matches!(
            logic.object_normalize(raw),
            Err(ChainError::SchemaValidation { ref field, .. }) if field == "amount"
        ));

        let mut raw = RawTransaction::from(&tx);
        raw.signature = None;
        assert!(logic.object_normalize(raw).is_err());
    }

    #[test]
    fn test_asset_decodes_most_specific_shape() {
        let vote: TransactionAsset =
            serde_json::from_str(r#"{"votes":["+aa"]}"#).unwrap();
        assert!(matches!(vote, TransactionAsset::Vote { .. }));
        let data: TransactionAsset = serde_json::from_str(r#"{"data":"hello"}"#).unwrap();
        assert!(matches!(data, TransactionAsset::Send { .. }));
        let other: TransactionAsset = serde_json::from_str(r#"{"foo":1}"#).unwrap();
        assert!(matches!(other, TransactionAsset::Other(_)));
    }
}
