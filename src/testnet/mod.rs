//! Deterministic fixtures for chain tests
//!
//! Keypairs come from fixed secrets, so ids and addresses are stable across
//! runs.

pub mod test_utils;

pub use test_utils::*;
