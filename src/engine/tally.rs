use crate::model::{SideId, TallySnapshot, TrialOutcome};
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe accumulator of trial outcomes for one side of interest.
///
/// `completed` is never stored on its own; it is the sum of the four buckets,
/// so every snapshot is balanced no matter how recorders interleave.
#[derive(Debug)]
pub struct TallyAggregator {
    side_of_interest: SideId,
    requested: u64,
    victories: AtomicU64,
    losses: AtomicU64,
    draws: AtomicU64,
    failures: AtomicU64,
}

impl TallyAggregator {
    pub fn new(side_of_interest: SideId, requested: u64) -> Self {
        Self {
            side_of_interest,
            requested,
            victories: AtomicU64::new(0),
            losses: AtomicU64::new(0),
            draws: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Count a trial that returned an outcome. A win by any other side is a loss.
    pub fn record_outcome(&self, outcome: &TrialOutcome) {
        let bucket = match outcome {
            TrialOutcome::Win(side) if *side == self.side_of_interest => &self.victories,
            TrialOutcome::Win(_) | TrialOutcome::Loss => &self.losses,
            TrialOutcome::Draw => &self.draws,
        };
        bucket.fetch_add(1, Ordering::AcqRel);
    }

    /// Count a trial that raised, panicked or was abandoned.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> TallySnapshot {
        let victories = self.victories.load(Ordering::Acquire);
        let losses = self.losses.load(Ordering::Acquire);
        let draws = self.draws.load(Ordering::Acquire);
        let failures = self.failures.load(Ordering::Acquire);
        TallySnapshot {
            requested: self.requested,
            completed: victories + losses + draws + failures,
            victories,
            losses,
            draws,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use test_case::test_case;

    fn blue() -> SideId {
        SideId::from("blue")
    }

    #[test]
    fn test_outcomes_land_in_one_bucket() {
        let tally = TallyAggregator::new(blue(), 5);
        tally.record_outcome(&TrialOutcome::Win(blue()));
        tally.record_outcome(&TrialOutcome::Win(SideId::from("red")));
        tally.record_outcome(&TrialOutcome::Loss);
        tally.record_outcome(&TrialOutcome::Draw);
        tally.record_failure();

        let snap = tally.snapshot();
        assert_eq!(
            snap,
            TallySnapshot {
                requested: 5,
                completed: 5,
                victories: 1,
                losses: 2,
                draws: 1,
                failures: 1,
            }
        );
        assert!(snap.is_balanced());
    }

    #[test]
    fn test_fresh_tally_is_zero() {
        let snap = TallyAggregator::new(blue(), 0).snapshot();
        assert_eq!(snap, TallySnapshot::default());
    }

    #[test_case(1, 1000 ; "single recorder")]
    #[test_case(4, 1000 ; "four recorders")]
    #[test_case(8, 4096 ; "eight recorders")]
    #[test_case(16, 160 ; "more recorders than cores")]
    fn test_concurrent_recording_loses_nothing(workers: u64, trial_count: u64) {
        let tally = Arc::new(TallyAggregator::new(blue(), trial_count));
        let per_worker = trial_count / workers;

        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let tally = Arc::clone(&tally);
                std::thread::spawn(move || {
                    for i in 0..per_worker {
                        match (w + i) % 5 {
                            0 => tally.record_outcome(&TrialOutcome::Win(SideId::from("blue"))),
                            1 => tally.record_outcome(&TrialOutcome::Loss),
                            2 => tally.record_outcome(&TrialOutcome::Win(SideId::from("red"))),
                            3 => tally.record_outcome(&TrialOutcome::Draw),
                            _ => tally.record_failure(),
                        }
                        // Observers racing the recorders must still see balanced counts.
                        assert!(tally.snapshot().is_balanced());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = tally.snapshot();
        assert_eq!(snap.completed, per_worker * workers);
        assert_eq!(
            snap.victories + snap.losses + snap.draws + snap.failures,
            snap.completed
        );
        assert!(snap.is_balanced());
    }

    #[test]
    fn test_snapshots_never_go_backwards() {
        let tally = Arc::new(TallyAggregator::new(blue(), 20_000));
        let writer = {
            let tally = Arc::clone(&tally);
            std::thread::spawn(move || {
                for _ in 0..20_000 {
                    tally.record_outcome(&TrialOutcome::Draw);
                }
            })
        };
        let mut last = 0;
        while !writer.is_finished() {
            let completed = tally.snapshot().completed;
            assert!(completed >= last);
            last = completed;
        }
        writer.join().unwrap();
        assert_eq!(tally.snapshot().completed, 20_000);
    }
}
