/// Remaining-operation counter of a single worker.
///
/// Starts at the worker's quota and loses one per resolved operation,
/// whatever its outcome. The worker stops the first time the count drops
/// below zero, so it always resolves at least `quota + 1` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionTracker {
    remaining: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaState {
    Continue,
    Exhausted,
}

impl CompletionTracker {
    pub fn new(quota: u64) -> Self {
        Self {
            remaining: i64::try_from(quota).unwrap_or(i64::MAX),
        }
    }

    pub fn record_completion(&mut self) -> QuotaState {
        self.remaining -= 1;
        if self.remaining < 0 {
            QuotaState::Exhausted
        } else {
            QuotaState::Continue
        }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_stops_only_below_zero() {
        let mut tracker = CompletionTracker::new(2);
        assert_eq!(tracker.record_completion(), QuotaState::Continue);
        assert_eq!(tracker.record_completion(), QuotaState::Continue);
        assert_eq!(tracker.remaining(), 0);
        assert_eq!(tracker.record_completion(), QuotaState::Exhausted);
        assert_eq!(tracker.remaining(), -1);
    }

    #[test]
    fn test_zero_quota_stops_on_first_completion() {
        let mut tracker = CompletionTracker::new(0);
        assert_eq!(tracker.record_completion(), QuotaState::Exhausted);
    }

    #[test]
    fn test_counter_keeps_going_negative() {
        let mut tracker = CompletionTracker::new(0);
        for _ in 0..5 {
            tracker.record_completion();
        }
        assert_eq!(tracker.remaining(), -5);
    }

    proptest! {
        // Successes and failures both count, and completions carry nothing
        // the tracker looks at, so every arrival order stops at the same point.
        #[test]
        fn prop_stop_decision_ignores_arrival_order(
            quota in 0u64..64,
            (arrived, permuted) in proptest::collection::vec(any::<bool>(), 0..160)
                .prop_flat_map(|outcomes| (Just(outcomes.clone()), Just(outcomes).prop_shuffle())),
        ) {
            let stop_at = |order: &[bool]| {
                let mut tracker = CompletionTracker::new(quota);
                order
                    .iter()
                    .position(|_| tracker.record_completion() == QuotaState::Exhausted)
            };

            let expected = if arrived.len() as u64 > quota { Some(quota as usize) } else { None };
            prop_assert_eq!(stop_at(&arrived), expected);
            prop_assert_eq!(stop_at(&permuted), expected);
        }
    }
}
