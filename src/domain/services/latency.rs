use std::collections::HashMap;
use std::time::Duration;

use crate::domain::entities::broker::BrokerId;

/// Exponentially-weighted moving average of round-trip times per broker.
///
/// Updated after every successful adapter call; the Best Latency strategy
/// routes to the lowest average and Best Price uses it to break ties.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    alpha: f64,
    averages: HashMap<BrokerId, f64>,
}

impl LatencyTracker {
    pub fn new(alpha: f64) -> Self {
        LatencyTracker {
            alpha: alpha.clamp(0.01, 1.0),
            averages: HashMap::new(),
        }
    }

    pub fn record(&mut self, broker: BrokerId, round_trip: Duration) {
        let sample = round_trip.as_secs_f64() * 1000.0;
        let average = self
            .averages
            .entry(broker)
            .or_insert(sample);
        *average = self.alpha * sample + (1.0 - self.alpha) * *average;
    }

    /// Current average in milliseconds. None for a broker never measured.
    pub fn average_ms(&self, broker: BrokerId) -> Option<f64> {
        self.averages.get(&broker).copied()
    }

    /// Average used for ranking: unmeasured brokers rank first so new
    /// brokers get sampled.
    pub fn ranking_ms(&self, broker: BrokerId) -> f64 {
        self.average_ms(broker).unwrap_or(0.0)
    }

    /// The broker with the lowest current average among candidates.
    pub fn fastest(&self, candidates: &[BrokerId]) -> Option<BrokerId> {
        candidates
            .iter()
            .copied()
            .min_by(|a, b| {
                self.ranking_ms(*a)
                    .partial_cmp(&self.ranking_ms(*b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let mut tracker = LatencyTracker::new(0.3);
        tracker.record(BrokerId::Zerodha, Duration::from_millis(100));
        assert!((tracker.average_ms(BrokerId::Zerodha).unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_moves_toward_new_samples() {
        let mut tracker = LatencyTracker::new(0.5);
        tracker.record(BrokerId::Zerodha, Duration::from_millis(100));
        tracker.record(BrokerId::Zerodha, Duration::from_millis(200));
        // 0.5 * 200 + 0.5 * 100
        assert!((tracker.average_ms(BrokerId::Zerodha).unwrap() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_fastest_picks_lowest_average() {
        let mut tracker = LatencyTracker::new(0.3);
        tracker.record(BrokerId::Zerodha, Duration::from_millis(80));
        tracker.record(BrokerId::Upstox, Duration::from_millis(40));
        let fastest = tracker
            .fastest(&[BrokerId::Zerodha, BrokerId::Upstox])
            .unwrap();
        assert_eq!(fastest, BrokerId::Upstox);
    }

    #[test]
    fn test_unmeasured_broker_ranks_first() {
        let mut tracker = LatencyTracker::new(0.3);
        tracker.record(BrokerId::Zerodha, Duration::from_millis(20));
        let fastest = tracker
            .fastest(&[BrokerId::Zerodha, BrokerId::Fyers])
            .unwrap();
        assert_eq!(fastest, BrokerId::Fyers);
    }

    #[test]
    fn test_fastest_empty_candidates() {
        let tracker = LatencyTracker::new(0.3);
        assert!(tracker.fastest(&[]).is_none());
    }
}
