use crate::config::Constants;
use crate::core::block_reward::BlockReward;
use crate::core::codec;
use crate::core::transaction::{check_id_format, hex_field, RawTransaction, Transaction, TransactionLogic};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{DbOp, Row, Table};
use crate::utils::{
    id_from_bytes, sha256_digest, verify_signature, Keypair, HASH_LENGTH, PUBLIC_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use log::debug;
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Only block version currently accepted.
pub const BLOCK_VERSION: i32 = 0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub version: i32,
    /// Seconds since the chain epoch
    pub timestamp: i32,
    pub height: u32,
    #[serde(default)]
    pub previous_block: Option<String>,
    pub number_of_transactions: u32,
    pub total_amount: u64,
    pub total_fee: u64,
    pub reward: u64,
    pub payload_length: u32,
    #[serde(with = "hex::serde")]
    pub payload_hash: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub generator_public_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub block_signature: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Decodes a stored `blocks` row (header only).
    pub fn from_row(row: &Row) -> Result<Block> {
        Ok(serde_json::from_value(Value::Object(row.clone()))?)
    }

    /// Copy of the header without transactions.
    pub fn header(&self) -> Block {
        Block {
            id: self.id.clone(),
            version: self.version,
            timestamp: self.timestamp,
            height: self.height,
            previous_block: self.previous_block.clone(),
            number_of_transactions: self.number_of_transactions,
            total_amount: self.total_amount,
            total_fee: self.total_fee,
            reward: self.reward,
            payload_length: self.payload_length,
            payload_hash: self.payload_hash.clone(),
            generator_public_key: self.generator_public_key.clone(),
            block_signature: self.block_signature.clone(),
            transactions: Vec::new(),
        }
    }

    pub fn generator_hex(&self) -> String {
        hex::encode(&self.generator_public_key)
    }
}

/// Transport form of a block, as received from peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub id: Option<String>,
    pub version: Option<i64>,
    pub timestamp: Option<i64>,
    pub height: Option<i64>,
    pub previous_block: Option<String>,
    pub number_of_transactions: Option<i64>,
    pub total_amount: Option<i64>,
    pub total_fee: Option<i64>,
    pub reward: Option<i64>,
    pub payload_length: Option<i64>,
    pub payload_hash: Option<String>,
    pub generator_public_key: Option<String>,
    pub block_signature: Option<String>,
    pub transactions: Option<Vec<RawTransaction>>,
}

impl From<&Block> for RawBlock {
    fn from(block: &Block) -> Self {
        RawBlock {
            id: Some(block.id.clone()).filter(|id| !id.is_empty()),
            version: Some(i64::from(block.version)),
            timestamp: Some(i64::from(block.timestamp)),
            height: Some(i64::from(block.height)),
            previous_block: block.previous_block.clone(),
            number_of_transactions: Some(i64::from(block.number_of_transactions)),
            total_amount: i64::try_from(block.total_amount).ok(),
            total_fee: i64::try_from(block.total_fee).ok(),
            reward: i64::try_from(block.reward).ok(),
            payload_length: Some(i64::from(block.payload_length)),
            payload_hash: Some(hex::encode(&block.payload_hash)),
            generator_public_key: Some(hex::encode(&block.generator_public_key)),
            block_signature: Some(hex::encode(&block.block_signature)),
            transactions: Some(block.transactions.iter().map(RawTransaction::from).collect()),
        }
    }
}

fn required<T>(field: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| ChainError::schema(field, format!("Missing required property: {field}")))
}

fn int_field<T: TryFrom<i64>>(field: &str, value: i64) -> Result<T> {
    T::try_from(value)
        .map_err(|_| ChainError::schema(field, format!("Value {value} is out of range")))
}

/// Monetary header fields get their own message for negative values.
fn amount_field(field: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        ChainError::schema(field, format!("Block {field} must not be negative: {value}"))
    })
}

pub struct BlockLogic {
    tx_logic: Arc<TransactionLogic>,
    constants: Arc<Constants>,
    rewards: BlockReward,
}

impl BlockLogic {
    pub fn new(constants: Arc<Constants>, tx_logic: Arc<TransactionLogic>) -> BlockLogic {
        BlockLogic {
            rewards: BlockReward::new(&constants),
            tx_logic,
            constants,
        }
    }

    pub fn rewards(&self) -> &BlockReward {
        &self.rewards
    }

    pub fn transaction_logic(&self) -> &TransactionLogic {
        &self.tx_logic
    }

    /// Builds and signs the next block on top of `previous`, or the genesis
    /// block when `previous` is `None`.
    ///
    /// Candidates are ordered by type then amount. Inclusion stops at the
    /// first transaction that would overflow the payload or the count limit.
    pub fn create(
        &self,
        keypair: &Keypair,
        timestamp: i32,
        transactions: &[Transaction],
        previous: Option<&Block>,
    ) -> Result<Block> {
        let mut candidates = transactions.to_vec();
        candidates.sort_by_key(|tx| (tx.tx_type, tx.amount));
        let conflicts = self.tx_logic.find_conflicts(&candidates)?;
        if !conflicts.is_empty() {
            debug!("Leaving out conflicting transactions: {}", conflicts.join(", "));
            candidates.retain(|tx| !conflicts.contains(&tx.id));
        }

        let height = previous.map_or(1, |p| p.height + 1);
        let max_payload = self.constants.max_payload_length;
        let mut payload = Context::new(&SHA256);
        let mut payload_length = 0usize;
        let mut total_amount = 0u64;
        let mut total_fee = 0u64;
        let mut included = Vec::new();

        for tx in candidates {
            if included.len() >= self.constants.max_txs_per_block {
                break;
            }
            let bytes = self.tx_logic.get_bytes(&tx, false, false)?;
            if payload_length + bytes.len() > max_payload {
                debug!(
                    "Payload limit reached at {} transactions ({payload_length} bytes)",
                    included.len()
                );
                break;
            }
            payload.update(&bytes);
            payload_length += bytes.len();
            total_amount = total_amount
                .checked_add(tx.amount)
                .ok_or_else(|| ChainError::InvalidBlock("Total amount overflow".to_string()))?;
            total_fee = total_fee
                .checked_add(tx.fee)
                .ok_or_else(|| ChainError::InvalidBlock("Total fee overflow".to_string()))?;
            included.push(tx);
        }

        let mut block = Block {
            id: String::new(),
            version: BLOCK_VERSION,
            timestamp,
            height,
            previous_block: previous.map(|p| p.id.clone()),
            number_of_transactions: u32::try_from(included.len())
                .map_err(|_| ChainError::InvalidBlock("Too many transactions".to_string()))?,
            total_amount,
            total_fee,
            reward: self.rewards.calc_reward(height),
            payload_length: u32::try_from(payload_length)
                .map_err(|_| ChainError::InvalidBlock("Payload too large".to_string()))?,
            payload_hash: payload.finish().as_ref().to_vec(),
            generator_public_key: keypair.public_key().to_vec(),
            block_signature: Vec::new(),
            transactions: included,
        };
        block.block_signature = self.sign(keypair, &block)?;
        block.id = self.get_id(&block)?;

        self.object_normalize(RawBlock::from(&block))
    }

    pub fn get_bytes(&self, block: &Block) -> Result<Vec<u8>> {
        codec::block_bytes(block, true)
    }

    /// Hash of the unsigned header; this is what the generator signs.
    pub fn get_hash(&self, block: &Block) -> Result<[u8; HASH_LENGTH]> {
        Ok(sha256_digest(&codec::block_bytes(block, false)?))
    }

    pub fn get_id(&self, block: &Block) -> Result<String> {
        Ok(id_from_bytes(&self.get_bytes(block)?))
    }

    pub fn sign(&self, keypair: &Keypair, block: &Block) -> Result<Vec<u8>> {
        Ok(keypair.sign(&self.get_hash(block)?))
    }

    pub fn verify_signature(&self, block: &Block) -> Result<bool> {
        let hash = self.get_hash(block)?;
        Ok(verify_signature(
            &hash,
            &block.block_signature,
            &block.generator_public_key,
        ))
    }

    /// Hash over the concatenated bytes of `transactions`.
    pub fn payload_hash(&self, transactions: &[Transaction]) -> Result<(Vec<u8>, usize)> {
        let mut payload = Context::new(&SHA256);
        let mut length = 0;
        for tx in transactions {
            let bytes = self.tx_logic.get_bytes(tx, false, false)?;
            length += bytes.len();
            payload.update(&bytes);
        }
        Ok((payload.finish().as_ref().to_vec(), length))
    }

    /// Row for the `blocks` table; transactions are stored separately.
    pub fn db_save(&self, block: &Block) -> Result<DbOp> {
        let Value::Object(values) = serde_json::to_value(block.header())? else {
            return Err(ChainError::Serialization(format!(
                "Block {} did not serialize to an object",
                block.id
            )));
        };
        Ok(DbOp::Create {
            table: Table::Blocks,
            values,
        })
    }

    /// Validates the transport form of a block and its transactions.
    pub fn object_normalize(&self, raw: RawBlock) -> Result<Block> {
        let version = int_field("version", required("version", raw.version)?)?;
        let timestamp = int_field("timestamp", required("timestamp", raw.timestamp)?)?;
        let height: u32 = int_field("height", required("height", raw.height)?)?;
        if height == 0 {
            return Err(ChainError::schema("height", "Value 0 is less than minimum 1"));
        }
        if let Some(id) = &raw.id {
            check_id_format("id", id)?;
        }
        if let Some(previous) = &raw.previous_block {
            check_id_format("previousBlock", previous)?;
        }

        let number_of_transactions = int_field(
            "numberOfTransactions",
            required("numberOfTransactions", raw.number_of_transactions)?,
        )?;
        let payload_length = int_field(
            "payloadLength",
            required("payloadLength", raw.payload_length)?,
        )?;
        let total_amount = amount_field("totalAmount", required("totalAmount", raw.total_amount)?)?;
        let total_fee = amount_field("totalFee", required("totalFee", raw.total_fee)?)?;
        let reward = amount_field("reward", required("reward", raw.reward)?)?;

        let payload_hash = hex_field(
            "payloadHash",
            &required("payloadHash", raw.payload_hash)?,
            HASH_LENGTH,
        )?;
        let generator_public_key = hex_field(
            "generatorPublicKey",
            &required("generatorPublicKey", raw.generator_public_key)?,
            PUBLIC_KEY_LENGTH,
        )?;
        let block_signature = hex_field(
            "blockSignature",
            &required("blockSignature", raw.block_signature)?,
            SIGNATURE_LENGTH,
        )?;

        let transactions = raw
            .transactions
            .unwrap_or_default()
            .into_iter()
            .map(|tx| self.tx_logic.object_normalize(tx))
            .collect::<Result<Vec<_>>>()?;

        let mut block = Block {
            id: raw.id.unwrap_or_default(),
            version,
            timestamp,
            height,
            previous_block: raw.previous_block,
            number_of_transactions,
            total_amount,
            total_fee,
            reward,
            payload_length,
            payload_hash,
            generator_public_key,
            block_signature,
            transactions,
        };
        if block.id.is_empty() {
            block.id = self.get_id(&block)?;
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{DelegateAsset, TransactionAsset};
    use crate::core::tx_types::{TransactionKind, TransactionRegistry};

    fn logic() -> BlockLogic {
        let constants = Arc::new(Constants::default());
        let tx_logic = Arc::new(TransactionLogic::new(
            constants.clone(),
            TransactionRegistry::with_defaults(),
        ));
        BlockLogic::new(constants, tx_logic)
    }

    fn send(logic: &BlockLogic, keypair: &Keypair, amount: u64, fee: u64) -> Transaction {
        logic
            .transaction_logic()
            .create(
                keypair,
                None,
                Transaction {
                    tx_type: TransactionKind::Send as u8,
                    timestamp: 100,
                    recipient_id: Some("58191285901858109R".to_string()),
                    amount,
                    fee,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    fn previous(height: u32) -> Block {
        Block {
            id: "10000000000000000001".to_string(),
            height,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_sums_and_orders_payload() {
        let logic = logic();
        let forger = Keypair::from_secret("forger").unwrap();
        let sender = Keypair::from_secret("sender").unwrap();
        let big = send(&logic, &sender, 2, 5);
        let small = send(&logic, &sender, 1, 5);

        let block = logic
            .create(&forger, 1_000, &[big.clone(), small.clone()], Some(&previous(10)))
            .unwrap();

        assert_eq!(block.height, 11);
        assert_eq!(block.total_fee, 10);
        assert_eq!(block.total_amount, 3);
        assert_eq!(block.number_of_transactions, 2);
        assert_eq!(block.reward, 30_000_000);
        assert_eq!(block.transactions[0].id, small.id);

        let tx_logic = logic.transaction_logic();
        let mut concatenated = tx_logic.get_bytes(&small, false, false).unwrap();
        concatenated.extend(tx_logic.get_bytes(&big, false, false).unwrap());
        assert_eq!(block.payload_hash, sha256_digest(&concatenated).to_vec());
        assert_eq!(block.payload_length as usize, concatenated.len());
        assert!(logic.verify_signature(&block).unwrap());
    }

    #[test]
    fn test_create_is_deterministic() {
        let logic = logic();
        let forger = Keypair::from_secret("forger").unwrap();
        let sender = Keypair::from_secret("sender").unwrap();
        let txs = vec![send(&logic, &sender, 7, 10_000_000)];
        let a = logic.create(&forger, 5, &txs, Some(&previous(3))).unwrap();
        let b = logic.create(&forger, 5, &txs, Some(&previous(3))).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(logic.get_hash(&a).unwrap(), logic.get_hash(&b).unwrap());
    }

    #[test]
    fn test_payload_overflow_excludes_rest() {
        let sender = Keypair::from_secret("sender").unwrap();
        let forger = Keypair::from_secret("forger").unwrap();
        // Three 117-byte sends; the limit leaves one byte short for the third.
        let constants = Arc::new(Constants {
            max_payload_length: 117 * 3 - 1,
            ..Constants::default()
        });
        let tx_logic = Arc::new(TransactionLogic::new(
            constants.clone(),
            TransactionRegistry::with_defaults(),
        ));
        let logic = BlockLogic::new(constants, tx_logic);
        let txs: Vec<Transaction> = (1..=4).map(|a| send(&logic, &sender, a, 5)).collect();

        let block = logic.create(&forger, 1, &txs, Some(&previous(1))).unwrap();
        assert_eq!(block.number_of_transactions, 2);
        assert_eq!(block.payload_length, 234);
        assert_eq!(block.total_amount, 3);
    }

    #[test]
    fn test_create_leaves_out_second_claim_on_username() {
        let logic = logic();
        let forger = Keypair::from_secret("forger").unwrap();
        let register = |secret: &str| {
            let keypair = Keypair::from_secret(secret).unwrap();
            logic
                .transaction_logic()
                .create(
                    &keypair,
                    None,
                    Transaction {
                        tx_type: TransactionKind::Delegate as u8,
                        timestamp: 100,
                        fee: 2_500_000_000,
                        asset: Some(TransactionAsset::Delegate {
                            delegate: DelegateAsset {
                                username: "shared".to_string(),
                                public_key: keypair.public_key_hex(),
                            },
                        }),
                        ..Default::default()
                    },
                )
                .unwrap()
        };
        let txs = vec![register("alice"), register("bob")];

        let block = logic.create(&forger, 1, &txs, Some(&previous(4))).unwrap();
        assert_eq!(block.number_of_transactions, 1);
        assert_eq!(block.transactions[0].id, txs[0].id);
    }

    #[test]
    fn test_signature_covers_header() {
        let logic = logic();
        let forger = Keypair::from_secret("forger").unwrap();
        let mut block = logic.create(&forger, 1, &[], Some(&previous(1))).unwrap();
        assert!(logic.verify_signature(&block).unwrap());
        block.total_fee += 1;
        assert!(!logic.verify_signature(&block).unwrap());
    }

    #[test]
    fn test_normalize_rejects_bad_fields() {
        let logic = logic();
        let forger = Keypair::from_secret("forger").unwrap();
        let block = logic.create(&forger, 1, &[], None).unwrap();
        assert_eq!(block.height, 1);
        assert!(block.previous_block.is_none());

        let mut raw = RawBlock::from(&block);
        raw.height = None;
        assert_eq!(
            logic.object_normalize(raw).unwrap_err(),
            ChainError::schema("height", "Missing required property: height")
        );

        let mut raw = RawBlock::from(&block);
        raw.payload_hash = None;
        assert_eq!(
            logic.object_normalize(raw).unwrap_err(),
            ChainError::schema("payloadHash", "Missing required property: payloadHash")
        );

        let mut raw = RawBlock::from(&block);
        raw.generator_public_key = Some("ab".repeat(31));
        assert!(matches!(
            logic.object_normalize(raw),
            Err(ChainError::SchemaValidation { ref field, .. }) if field == "generatorPublicKey"
        ));

        let mut raw = RawBlock::from(&block);
        raw.total_fee = Some(-1);
        assert_eq!(
            logic.object_normalize(raw).unwrap_err(),
            ChainError::schema("totalFee", "Block totalFee must not be negative: -1")
        );
    }

    #[test]
    fn test_round_trip_through_header_bytes() {
        let logic = logic();
        let forger = Keypair::from_secret("forger").unwrap();
        let block = logic.create(&forger, 42, &[], Some(&previous(7))).unwrap();
        let bytes = logic.get_bytes(&block).unwrap();

        let mut decoded = codec::decode_block_header(&bytes).unwrap();
        decoded.height = block.height;
        let normalized = logic.object_normalize(RawBlock::from(&decoded)).unwrap();
        assert_eq!(normalized, block.header());
    }

    #[test]
    fn test_db_save_skips_transactions() {
        let logic = logic();
        let forger = Keypair::from_secret("forger").unwrap();
        let sender = Keypair::from_secret("sender").unwrap();
        let txs = vec![send(&logic, &sender, 1, 10_000_000)];
        let block = logic.create(&forger, 1, &txs, Some(&previous(1))).unwrap();
        let DbOp::Create { table, values } = logic.db_save(&block).unwrap() else {
            panic!("expected create");
        };
        assert_eq!(table, Table::Blocks);
        assert!(!values.contains_key("transactions"));
        assert_eq!(Block::from_row(&values).unwrap(), block.header());
    }
}
