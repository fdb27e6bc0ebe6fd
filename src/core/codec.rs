//! Canonical byte layouts hashed and signed for blocks and transactions.
//!
//! Ints are 4-byte little-endian, longs 8-byte little-endian, ids and
//! addresses 8-byte big-endian. Any change here forks the network.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::error::{ChainError, Result};
use crate::utils::{
    address_to_u64, id_from_bytes, ByteReader, ByteWriter, HASH_LENGTH, PUBLIC_KEY_LENGTH,
    SIGNATURE_LENGTH,
};

/// Size of a block header without signature.
pub const BLOCK_HEADER_LENGTH: usize = 4 + 4 + 8 + 4 + 8 + 8 + 8 + 4 + HASH_LENGTH + PUBLIC_KEY_LENGTH;

fn parse_id(field: &str, id: &str) -> Result<u64> {
    id.parse::<u64>()
        .map_err(|_| ChainError::Serialization(format!("Invalid {field}: {id}")))
}

/// Transaction bytes with the type-specific `asset` block already encoded.
pub fn transaction_bytes(
    tx: &Transaction,
    asset: &[u8],
    skip_signature: bool,
    skip_second_signature: bool,
) -> Result<Vec<u8>> {
    let mut writer = ByteWriter::with_capacity(1 + 4 + 32 + 8 + 8 + asset.len() + 128);
    writer
        .write_byte(tx.tx_type)
        .write_int(tx.timestamp)
        .write_fixed("senderPublicKey", &tx.sender_public_key, PUBLIC_KEY_LENGTH)?;

    match &tx.recipient_id {
        Some(recipient) => writer.write_id(address_to_u64(recipient)?),
        None => writer.write_bytes(&[0u8; 8]),
    };

    writer.write_long(tx.amount).write_bytes(asset);

    if !skip_signature && !tx.signature.is_empty() {
        writer.write_fixed("signature", &tx.signature, SIGNATURE_LENGTH)?;
    }
    if !skip_second_signature {
        if let Some(sign_signature) = &tx.sign_signature {
            writer.write_fixed("signSignature", sign_signature, SIGNATURE_LENGTH)?;
        }
    }
    Ok(writer.into_bytes())
}

pub fn block_bytes(block: &Block, include_signature: bool) -> Result<Vec<u8>> {
    let mut writer = ByteWriter::with_capacity(BLOCK_HEADER_LENGTH + SIGNATURE_LENGTH);
    writer.write_int(block.version).write_int(block.timestamp);

    match &block.previous_block {
        Some(previous) => writer.write_id(parse_id("previousBlock", previous)?),
        None => writer.write_bytes(&[0u8; 8]),
    };

    let count = i32::try_from(block.number_of_transactions)
        .map_err(|_| ChainError::Serialization("numberOfTransactions overflow".to_string()))?;
    let payload_length = i32::try_from(block.payload_length)
        .map_err(|_| ChainError::Serialization("payloadLength overflow".to_string()))?;

    writer
        .write_int(count)
        .write_long(block.total_amount)
        .write_long(block.total_fee)
        .write_long(block.reward)
        .write_int(payload_length)
        .write_fixed("payloadHash", &block.payload_hash, HASH_LENGTH)?
        .write_fixed(
            "generatorPublicKey",
            &block.generator_public_key,
            PUBLIC_KEY_LENGTH,
        )?;

    if include_signature && !block.block_signature.is_empty() {
        writer.write_fixed("blockSignature", &block.block_signature, SIGNATURE_LENGTH)?;
    }
    Ok(writer.into_bytes())
}

/// Parses header bytes back into a block without transactions. Height is
/// not part of the header and comes back as 0; the id is derived when the
/// bytes carry a signature.
pub fn decode_block_header(bytes: &[u8]) -> Result<Block> {
    let mut reader = ByteReader::new(bytes);
    let version = reader.read_int()?;
    let timestamp = reader.read_int()?;
    let previous = reader.read_id()?;
    let number_of_transactions = reader.read_int()?;
    let total_amount = reader.read_long()?;
    let total_fee = reader.read_long()?;
    let reward = reader.read_long()?;
    let payload_length = reader.read_int()?;
    let payload_hash = reader.read_bytes(HASH_LENGTH)?;
    let generator_public_key = reader.read_bytes(PUBLIC_KEY_LENGTH)?;

    let block_signature = match reader.remaining() {
        0 => Vec::new(),
        SIGNATURE_LENGTH => reader.read_bytes(SIGNATURE_LENGTH)?,
        n => {
            return Err(ChainError::Serialization(format!(
                "Unexpected {n} trailing bytes in block header"
            )))
        }
    };

    let non_negative = |field: &str, value: i32| {
        u32::try_from(value)
            .map_err(|_| ChainError::Serialization(format!("Negative {field}: {value}")))
    };

    let id = if block_signature.is_empty() {
        String::new()
    } else {
        id_from_bytes(bytes)
    };

    Ok(Block {
        id,
        version,
        timestamp,
        height: 0,
        previous_block: (previous != 0).then(|| previous.to_string()),
        number_of_transactions: non_negative("numberOfTransactions", number_of_transactions)?,
        total_amount,
        total_fee,
        reward,
        payload_length: non_negative("payloadLength", payload_length)?,
        payload_hash,
        generator_public_key,
        block_signature,
        transactions: Vec::new(),
    })
}
