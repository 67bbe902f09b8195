//! Deduplication and N-frame persistence for foreground candidates.

use std::time::Duration;

use crate::{BoundingBox, CandidateRegion, DepositRecord};

/// Append-only record of confirmed deposits for one session.
#[derive(Clone, Debug, Default)]
pub struct DepositHistory {
    records: Vec<DepositRecord>,
}

impl DepositHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bbox: BoundingBox, registered_at: Duration) -> &DepositRecord {
        self.records.push(DepositRecord { bbox, registered_at });
        &self.records[self.records.len() - 1]
    }

    /// Whether `candidate` collides with any registered deposit.
    pub fn collides(&self, candidate: &BoundingBox) -> bool {
        self.records
            .iter()
            .any(|record| candidate.collides_with(&record.bbox))
    }

    pub fn records(&self) -> &[DepositRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Track {
    bbox: BoundingBox,
    count: u32,
}

/// Tracks candidates across settled cycles until one has been seen, without
/// colliding with history, on `required_frames` consecutive passes.
#[derive(Clone, Debug)]
pub struct ConfirmationFilter {
    required_frames: u32,
    tracks: Vec<Track>,
}

impl ConfirmationFilter {
    pub fn new(required_frames: u32) -> Self {
        Self {
            required_frames: required_frames.max(1),
            tracks: Vec::new(),
        }
    }

    /// Scan `candidates` in order and promote at most one.
    ///
    /// A promoted candidate is registered in `history` before returning.
    /// Every other candidate keeps a track and may promote on a later pass.
    pub fn evaluate(
        &mut self,
        candidates: &[CandidateRegion],
        history: &mut DepositHistory,
        now: Duration,
    ) -> Option<CandidateRegion> {
        let previous = std::mem::take(&mut self.tracks);
        let mut reused = vec![false; previous.len()];
        let mut promoted = None;

        for candidate in candidates {
            let matched = (0..previous.len())
                .find(|&i| !reused[i] && candidate.bbox.collides_with(&previous[i].bbox));
            let prior = matched.map(|i| {
                reused[i] = true;
                previous[i].count
            });

            if history.collides(&candidate.bbox) {
                self.tracks.push(Track {
                    bbox: candidate.bbox,
                    count: 0,
                });
                continue;
            }

            let count = prior.unwrap_or(0) + 1;
            if promoted.is_none() && count >= self.required_frames {
                history.register(candidate.bbox, now);
                promoted = Some(*candidate);
                continue;
            }
            self.tracks.push(Track {
                bbox: candidate.bbox,
                count,
            });
        }
        promoted
    }

    /// Any non-colliding candidate still building up confirmation.
    pub fn has_pending(&self) -> bool {
        self.tracks.iter().any(|track| track.count > 0)
    }

    /// Highest confirmation count among live tracks.
    pub fn progress(&self) -> u32 {
        self.tracks.iter().map(|t| t.count).max().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: u32, y: u32) -> CandidateRegion {
        CandidateRegion {
            bbox: BoundingBox::new(x, y, 12, 12),
            area: 121.0,
            timestamp: Duration::ZERO,
        }
    }

    #[test]
    fn promotes_after_required_frames() {
        let mut filter = ConfirmationFilter::new(3);
        let mut history = DepositHistory::new();
        let seen = [candidate(20, 20)];

        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_none());
        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_none());
        assert_eq!(filter.progress(), 2);
        let promoted = filter.evaluate(&seen, &mut history, Duration::from_secs(2));
        assert_eq!(promoted, Some(seen[0]));
        assert_eq!(history.len(), 1);
        assert_eq!(history.records()[0].registered_at, Duration::from_secs(2));
    }

    #[test]
    fn registered_region_never_promotes_again() {
        let mut filter = ConfirmationFilter::new(1);
        let mut history = DepositHistory::new();
        let seen = [candidate(20, 20)];
        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_some());

        for _ in 0..5 {
            assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_none());
        }
        assert_eq!(history.len(), 1);
        assert!(!filter.has_pending());
    }

    #[test]
    fn disappearing_candidate_loses_progress() {
        let mut filter = ConfirmationFilter::new(3);
        let mut history = DepositHistory::new();
        let seen = [candidate(20, 20)];
        filter.evaluate(&seen, &mut history, Duration::ZERO);
        filter.evaluate(&seen, &mut history, Duration::ZERO);
        filter.evaluate(&[], &mut history, Duration::ZERO);
        assert_eq!(filter.progress(), 0);
        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_none());
    }

    #[test]
    fn reset_clears_progress() {
        let mut filter = ConfirmationFilter::new(2);
        let mut history = DepositHistory::new();
        let seen = [candidate(20, 20)];
        filter.evaluate(&seen, &mut history, Duration::ZERO);
        filter.reset();
        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_none());
        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_some());
    }

    #[test]
    fn two_objects_promote_on_separate_cycles() {
        let mut filter = ConfirmationFilter::new(2);
        let mut history = DepositHistory::new();
        let seen = [candidate(10, 10), candidate(50, 50)];

        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_none());
        let first = filter.evaluate(&seen, &mut history, Duration::ZERO);
        assert_eq!(first.map(|c| c.bbox.x), Some(10));
        assert!(filter.has_pending());

        let second = filter.evaluate(&seen, &mut history, Duration::ZERO);
        assert_eq!(second.map(|c| c.bbox.x), Some(50));
        assert!(!filter.has_pending());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn single_pass_confirmation_keeps_second_object_pending() {
        let mut filter = ConfirmationFilter::new(1);
        let mut history = DepositHistory::new();
        let seen = [candidate(10, 10), candidate(50, 50)];

        let first = filter.evaluate(&seen, &mut history, Duration::ZERO);
        assert_eq!(first.map(|c| c.bbox.x), Some(10));
        assert!(filter.has_pending());

        let second = filter.evaluate(&seen, &mut history, Duration::ZERO);
        assert_eq!(second.map(|c| c.bbox.x), Some(50));
        assert!(!filter.has_pending());
        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_none());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn candidate_overlapping_a_fresh_promotion_is_not_tracked() {
        let mut filter = ConfirmationFilter::new(1);
        let mut history = DepositHistory::new();
        let seen = [candidate(10, 10), candidate(14, 12)];
        assert!(filter.evaluate(&seen, &mut history, Duration::ZERO).is_some());
        assert!(!filter.has_pending());
        assert_eq!(history.len(), 1);
    }
}
