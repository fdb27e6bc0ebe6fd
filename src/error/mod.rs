//! Error handling for the node core
//!
//! Verification verdicts are plain values (see `core::verify`); everything in
//! here is a failure that travels up through `Result`.

use std::fmt;

/// Result type alias for chain operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Error types for block, transaction, round and storage operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Structural violation of a block or transaction, naming the first failing field
    SchemaValidation { field: String, message: String },
    /// Sender cannot cover amount + fee with the checked balance
    InsufficientFunds {
        address: String,
        required: u64,
        available: u64,
    },
    /// Declared fee is below the minimum for the transaction type at this height
    InsufficientFee { required: u64, provided: u64 },
    /// Transaction-level rule violation
    Transaction(String),
    /// Block-level rule violation outside of the verification battery
    InvalidBlock(String),
    /// Collected verification errors, surfaced when a caller treats the verdict as fatal
    Verification(Vec<String>),
    /// Ledger store failures (fatal for the current block)
    Storage(String),
    /// Key handling or signing failures
    Crypto(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
    /// Lookup of an entity that does not exist
    NotFound(String),
}

impl ChainError {
    pub fn schema(field: &str, message: impl Into<String>) -> Self {
        ChainError::SchemaValidation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn tx(message: impl Into<String>) -> Self {
        ChainError::Transaction(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        ChainError::Storage(message.into())
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::SchemaValidation { field, message } => {
                write!(f, "Schema validation failed on {field}: {message}")
            }
            ChainError::InsufficientFunds {
                address,
                required,
                available,
            } => write!(
                f,
                "Account does not have enough currency: {address} balance: {available} required: {required}"
            ),
            ChainError::InsufficientFee { required, provided } => {
                write!(f, "Insufficient fee: required {required}, provided {provided}")
            }
            ChainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            ChainError::Verification(errors) => {
                write!(f, "Verification failed: {}", errors.join(", "))
            }
            ChainError::Storage(msg) => write!(f, "Storage error: {msg}"),
            ChainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            ChainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ChainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            ChainError::Io(msg) => write!(f, "I/O error: {msg}"),
            ChainError::NotFound(msg) => write!(f, "Not found: {msg}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<sled::Error> for ChainError {
    fn from(err: sled::Error) -> Self {
        ChainError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

impl From<hex::FromHexError> for ChainError {
    fn from(err: hex::FromHexError) -> Self {
        ChainError::Serialization(format!("Invalid hex: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_field() {
        let err = ChainError::schema("payloadHash", "expected 32 bytes");
        assert_eq!(
            err.to_string(),
            "Schema validation failed on payloadHash: expected 32 bytes"
        );
    }

    #[test]
    fn test_verification_error_joins_messages() {
        let err = ChainError::Verification(vec![
            "Invalid payload hash".to_string(),
            "Invalid total fee".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Verification failed: Invalid payload hash, Invalid total fee"
        );
    }
}
