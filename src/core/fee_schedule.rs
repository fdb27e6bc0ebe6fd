use crate::config::{Constants, FeeMilestone};

/// Minimum fees per transaction kind, selected by block height.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    milestones: Vec<FeeMilestone>,
}

impl FeeSchedule {
    pub fn new(constants: &Constants) -> FeeSchedule {
        FeeSchedule {
            milestones: constants.fees.clone(),
        }
    }

    pub fn at(&self, height: u32) -> FeeMilestone {
        self.milestones
            .iter()
            .rev()
            .find(|m| height >= m.from_height)
            .or_else(|| self.milestones.first())
            .copied()
            .unwrap_or(FeeMilestone {
                from_height: 1,
                send: 0,
                vote: 0,
                second_signature: 0,
                delegate: 0,
                multisignature: 0,
                send_data_multiplier: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_milestones_take_over() {
        let mut constants = Constants::default();
        let mut raised = constants.fees[0];
        raised.from_height = 100;
        raised.send = 20_000_000;
        constants.fees.push(raised);

        let schedule = FeeSchedule::new(&constants);
        assert_eq!(schedule.at(1).send, 10_000_000);
        assert_eq!(schedule.at(99).send, 10_000_000);
        assert_eq!(schedule.at(100).send, 20_000_000);
    }
}
