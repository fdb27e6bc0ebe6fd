use crate::config::Constants;

/// Forging time slots counted from the chain epoch.
#[derive(Debug, Clone, Copy)]
pub struct Slots {
    epoch: i64,
    interval: i64,
    delegates: i64,
}

impl Slots {
    pub fn new(constants: &Constants) -> Slots {
        Slots {
            epoch: constants.epoch,
            interval: i64::from(constants.block_time),
            delegates: i64::from(constants.active_delegates),
        }
    }

    /// Seconds since the epoch for a unix timestamp.
    pub fn epoch_time(&self, unix_seconds: i64) -> i64 {
        unix_seconds - self.epoch
    }

    /// Unix timestamp of an epoch time.
    pub fn real_time(&self, epoch_time: i64) -> i64 {
        epoch_time + self.epoch
    }

    pub fn slot_number(&self, epoch_time: i64) -> i64 {
        epoch_time.div_euclid(self.interval)
    }

    pub fn slot_time(&self, slot: i64) -> i64 {
        slot * self.interval
    }

    pub fn next_slot(&self, epoch_time: i64) -> i64 {
        self.slot_number(epoch_time) + 1
    }

    /// Last slot of the delegate cycle starting at `next_slot`.
    pub fn last_slot(&self, next_slot: i64) -> i64 {
        next_slot + self.delegates
    }

    /// Index of the delegate forging `slot` in a shuffled delegate list.
    pub fn delegate_index(&self, slot: i64) -> usize {
        slot.rem_euclid(self.delegates) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_arithmetic() {
        let constants = Constants::default();
        let slots = Slots::new(&constants);
        let now = constants.epoch + 95;
        let time = slots.epoch_time(now);
        assert_eq!(time, 95);
        assert_eq!(slots.slot_number(time), 3);
        assert_eq!(slots.slot_time(3), 90);
        assert_eq!(slots.next_slot(time), 4);
        assert_eq!(slots.last_slot(4), 105);
        assert_eq!(slots.real_time(time), now);
        assert_eq!(slots.delegate_index(103), 2);
    }
}
