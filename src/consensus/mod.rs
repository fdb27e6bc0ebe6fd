//! DPoS round settlement
//!
//! Delegate ranking, forging slots and the per-round reward, fee and
//! missed-block bookkeeping applied when a round completes.

pub mod delegates;
pub mod round;
pub mod round_changes;
pub mod rounds;
pub mod slots;

pub use delegates::DelegatesLogic;
pub use round::{RoundLogic, RoundScope};
pub use round_changes::{RoundChange, RoundChanges};
pub use rounds::{calc_round, RoundsLogic};
pub use slots::Slots;
