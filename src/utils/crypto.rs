use ring::digest::{Context, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use zeroize::Zeroizing;

use crate::error::{ChainError, Result};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;
pub const HASH_LENGTH: usize = 32;

/// Marker appended to the decimal form of an address
pub const ADDRESS_SUFFIX: char = 'R';

/// Recipient sentinel used by registration transactions
pub const NULL_ADDRESS: &str = "0R";

pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ChainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    if duration > i64::MAX as u64 {
        return Err(ChainError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> [u8; HASH_LENGTH] {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(digest.as_ref());
    out
}

/// Ed25519 keypair used for block and transaction signatures.
pub struct Keypair {
    inner: Ed25519KeyPair,
    public_key: [u8; PUBLIC_KEY_LENGTH],
}

impl Keypair {
    pub fn from_seed(seed: &[u8; 32]) -> Result<Keypair> {
        let inner = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| ChainError::Crypto(format!("Failed to create key pair from seed: {e}")))?;
        let mut public_key = [0u8; PUBLIC_KEY_LENGTH];
        public_key.copy_from_slice(inner.public_key().as_ref());
        Ok(Keypair { inner, public_key })
    }

    /// Derives the keypair from a secret passphrase (seed = sha256(secret)).
    pub fn from_secret(secret: &str) -> Result<Keypair> {
        let seed = Zeroizing::new(sha256_digest(secret.as_bytes()));
        Self::from_seed(&seed)
    }

    pub fn generate() -> Result<Keypair> {
        let rng = SystemRandom::new();
        let mut seed = Zeroizing::new([0u8; 32]);
        rng.fill(&mut seed[..])
            .map_err(|_| ChainError::Crypto("Failed to gather randomness".to_string()))?;
        Self::from_seed(&seed)
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn address(&self) -> String {
        derive_address(&self.public_key)
    }

    pub fn sign(&self, hash: &[u8]) -> Vec<u8> {
        self.inner.sign(hash).as_ref().to_vec()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

pub fn verify_signature(hash: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    if signature.len() != SIGNATURE_LENGTH || public_key.len() != PUBLIC_KEY_LENGTH {
        return false;
    }
    let peer_public_key = UnparsedPublicKey::new(&ED25519, public_key);
    peer_public_key.verify(hash, signature).is_ok()
}

/// Numeric identifier from a sha256 digest: the first 8 bytes, reversed,
/// read as an unsigned big-endian integer.
pub fn id_from_hash(hash: &[u8; HASH_LENGTH]) -> u64 {
    let mut temp = [0u8; 8];
    temp.copy_from_slice(&hash[..8]);
    temp.reverse();
    u64::from_be_bytes(temp)
}

pub fn id_from_bytes(bytes: &[u8]) -> String {
    id_from_hash(&sha256_digest(bytes)).to_string()
}

pub fn derive_address(public_key: &[u8]) -> String {
    let hash = sha256_digest(public_key);
    format!("{}{}", id_from_hash(&hash), ADDRESS_SUFFIX)
}

/// Numeric part of an address as written into transaction bytes.
pub fn address_to_u64(address: &str) -> Result<u64> {
    let numeric = address
        .strip_suffix(ADDRESS_SUFFIX)
        .ok_or_else(|| ChainError::tx(format!("Invalid address: {address}")))?;
    if numeric.is_empty() || !numeric.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChainError::tx(format!("Invalid address: {address}")));
    }
    numeric
        .parse::<u64>()
        .map_err(|e| ChainError::tx(format!("Invalid address {address}: {e}")))
}

pub fn is_valid_address(address: &str) -> bool {
    address.len() <= 22 && address_to_u64(address).is_ok()
}

pub fn is_valid_public_key_hex(value: &str) -> bool {
    value.len() == PUBLIC_KEY_LENGTH * 2 && hex::decode(value).is_ok()
}
