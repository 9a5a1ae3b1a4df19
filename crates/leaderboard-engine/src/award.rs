//! Award policies - how many points a single claim is worth

use crate::{error::AwardError, types::Participant};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;

/// Decides the points awarded for one claim.
///
/// Implementations must return a positive value and must not derive it from
/// earlier awards.
pub trait AwardPolicy: Send + Sync {
    fn award(&self, participant: &Participant) -> Result<u64, AwardError>;
}

/// Uniform random award in `min..=max`
#[derive(Debug, Clone, Copy)]
pub struct RandomAward {
    min: u64,
    max: u64,
}

impl RandomAward {
    pub fn new(min: u64, max: u64) -> Result<Self, AwardError> {
        if min == 0 || min > max {
            return Err(AwardError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl Default for RandomAward {
    fn default() -> Self {
        Self {
            min: crate::DEFAULT_AWARD_MIN,
            max: crate::DEFAULT_AWARD_MAX,
        }
    }
}

impl AwardPolicy for RandomAward {
    fn award(&self, _participant: &Participant) -> Result<u64, AwardError> {
        Ok(rand::thread_rng().gen_range(self.min..=self.max))
    }
}

/// Same award for every claim
#[derive(Debug, Clone, Copy)]
pub struct FixedAward(pub u64);

impl AwardPolicy for FixedAward {
    fn award(&self, _participant: &Participant) -> Result<u64, AwardError> {
        Ok(self.0)
    }
}

/// Scripted awards, handed out in order. Fails once the script runs out.
#[derive(Debug, Default)]
pub struct SequenceAward {
    awards: Mutex<VecDeque<u64>>,
}

impl SequenceAward {
    pub fn new(awards: impl IntoIterator<Item = u64>) -> Self {
        Self {
            awards: Mutex::new(awards.into_iter().collect()),
        }
    }

    /// Awards left in the script
    pub fn remaining(&self) -> usize {
        self.awards.lock().len()
    }
}

impl AwardPolicy for SequenceAward {
    fn award(&self, _participant: &Participant) -> Result<u64, AwardError> {
        self.awards.lock().pop_front().ok_or(AwardError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantId;

    fn participant() -> Participant {
        Participant {
            id: ParticipantId(1),
            name: "p".into(),
            initial_points: 0,
            total_points: 0,
            registered_at_ms: 0,
        }
    }

    #[test]
    fn test_random_award_stays_in_range() {
        let policy = RandomAward::new(1, 10).unwrap();
        for _ in 0..1_000 {
            let points = policy.award(&participant()).unwrap();
            assert!((1..=10).contains(&points));
        }
    }

    #[test]
    fn test_random_award_rejects_bad_range() {
        assert!(RandomAward::new(0, 10).is_err());
        assert!(RandomAward::new(5, 4).is_err());
        assert!(RandomAward::new(3, 3).is_ok());
    }

    #[test]
    fn test_sequence_award_exhausts() {
        let policy = SequenceAward::new([10, 20]);
        assert_eq!(policy.award(&participant()), Ok(10));
        assert_eq!(policy.award(&participant()), Ok(20));
        assert_eq!(policy.award(&participant()), Err(AwardError::Exhausted));
    }
}
