use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Rolling window of portfolio values the P&L is measured against.
///
/// The baseline is the oldest sample still inside the lookback window.
#[derive(Debug, Default)]
pub struct BaselineTracker {
    samples: VecDeque<(DateTime<Utc>, Decimal)>,
    reanchor_pending: bool,
}

impl BaselineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample and return the baseline in force for it
    pub fn observe(&mut self, at: DateTime<Utc>, value: Decimal, lookback_hours: u64) -> Decimal {
        if self.reanchor_pending {
            self.samples.clear();
            self.reanchor_pending = false;
        }

        self.samples.push_back((at, value));

        let cutoff = at - Duration::hours(lookback_hours.min(i64::MAX as u64 / 3600) as i64);
        while self.samples.len() > 1 {
            match self.samples.front() {
                Some((ts, _)) if *ts < cutoff => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }

        self.baseline().unwrap_or(value)
    }

    /// Drop history so the next sample becomes the new baseline
    pub fn reanchor(&mut self) {
        self.reanchor_pending = true;
    }

    pub fn baseline(&self) -> Option<Decimal> {
        self.samples.front().map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn test_first_sample_is_its_own_baseline() {
        let mut tracker = BaselineTracker::new();
        assert_eq!(tracker.observe(at(0), dec!(100), 12), dec!(100));
    }

    #[test]
    fn test_oldest_sample_in_window_wins() {
        let mut tracker = BaselineTracker::new();
        tracker.observe(at(0), dec!(100), 12);
        tracker.observe(at(4), dec!(90), 12);
        assert_eq!(tracker.observe(at(8), dec!(80), 12), dec!(100));
    }

    #[test]
    fn test_samples_outside_window_are_pruned() {
        let mut tracker = BaselineTracker::new();
        tracker.observe(at(0), dec!(100), 12);
        tracker.observe(at(6), dec!(90), 12);
        let baseline = tracker.observe(at(13), dec!(85), 12);
        assert_eq!(baseline, dec!(90));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_reanchor_resets_on_next_sample() {
        let mut tracker = BaselineTracker::new();
        tracker.observe(at(0), dec!(100), 12);
        tracker.observe(at(1), dec!(70), 12);
        tracker.reanchor();
        assert_eq!(tracker.observe(at(2), dec!(70), 12), dec!(70));
        assert_eq!(tracker.observe(at(3), dec!(65), 12), dec!(70));
    }
}
