//! Utility functions and helpers
//!
//! This module contains the crypto adapter, the fixed-width byte codec
//! primitives and small helpers shared across the core.

pub mod bytes;
pub mod crypto;
pub mod diff;
pub mod serde_hex;

pub use bytes::{ByteReader, ByteWriter};
pub use crypto::{
    address_to_u64, current_timestamp, derive_address, id_from_bytes, id_from_hash,
    is_valid_address, is_valid_public_key_hex, sha256_digest, verify_signature, Keypair,
    ADDRESS_SUFFIX, HASH_LENGTH, NULL_ADDRESS, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
