//! Configuration management
//!
//! Consensus constants (identical on every node) and node-level settings
//! resolved from the environment.

pub mod constants;
pub mod settings;

pub use constants::{Constants, FeeMilestone, RewardMilestone};
pub use settings::{Settings, GLOBAL_CONFIG};
