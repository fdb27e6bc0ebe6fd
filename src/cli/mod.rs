//! Command-line interface
//!
//! Argument parsing for the `delegate-chain` binary.

pub mod commands;

pub use commands::{Command, Opt};
