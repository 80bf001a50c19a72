//! Per-bar price level profile.
//!
//! A flat, price-ascending view of one bar's levels with the totals needed
//! by the extreme-level features. Index 0 is the lowest price.

use trapped_core::{LevelMap, PriceLevelStats};
use std::ops::Range;

/// Ratio guarded against a zero denominator.
#[inline]
pub fn safe_ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Price-ascending level profile of one bar.
#[derive(Debug, Clone, Default)]
pub struct LevelProfile {
    prices: Vec<f64>,
    levels: Vec<PriceLevelStats>,
    total_volume: f64,
    total_ask: f64,
    total_bid: f64,
}

impl LevelProfile {
    /// Build from a level map.
    pub fn new(levels: &LevelMap) -> Self {
        let mut profile = Self {
            prices: Vec::with_capacity(levels.len()),
            levels: Vec::with_capacity(levels.len()),
            ..Default::default()
        };
        for (price, level) in levels {
            profile.prices.push(price.0);
            profile.levels.push(*level);
            profile.total_volume += level.volume;
            profile.total_ask += level.ask_volume;
            profile.total_bid += level.bid_volume;
        }
        profile
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the bar has no levels.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Price at index `i`.
    pub fn price(&self, i: usize) -> f64 {
        self.prices[i]
    }

    /// Level stats at index `i`.
    pub fn level(&self, i: usize) -> &PriceLevelStats {
        &self.levels[i]
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    pub fn total_ask(&self) -> f64 {
        self.total_ask
    }

    pub fn total_bid(&self) -> f64 {
        self.total_bid
    }

    /// Indices of the `n` highest-priced levels.
    ///
    /// With fewer than `2n` levels this overlaps [`Self::low_extremes`].
    pub fn high_extremes(&self, n: usize) -> Range<usize> {
        self.len().saturating_sub(n)..self.len()
    }

    /// Indices of the `n` lowest-priced levels.
    pub fn low_extremes(&self, n: usize) -> Range<usize> {
        0..n.min(self.len())
    }

    /// Share of bar volume traded at level `i`.
    pub fn concentration(&self, i: usize) -> f64 {
        safe_ratio(self.levels[i].volume, self.total_volume)
    }

    /// Whether any level in `zone` reaches `vol_threshold`.
    pub fn has_concentration(&self, zone: Range<usize>, vol_threshold: f64) -> bool {
        zone.into_iter()
            .any(|i| self.concentration(i) >= vol_threshold)
    }

    /// Share of all ask volume traded in the top `n` levels.
    pub fn high_ask_aggression(&self, n: usize) -> f64 {
        let ask: f64 = self.levels[self.high_extremes(n)]
            .iter()
            .map(|l| l.ask_volume)
            .sum();
        safe_ratio(ask, self.total_ask)
    }

    /// Share of all bid volume traded in the bottom `n` levels.
    pub fn low_bid_aggression(&self, n: usize) -> f64 {
        let bid: f64 = self.levels[self.low_extremes(n)]
            .iter()
            .map(|l| l.bid_volume)
            .sum();
        safe_ratio(bid, self.total_bid)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ordered_float::OrderedFloat;

    /// Build a level map from `(price, volume, bid, ask)` rows.
    pub(crate) fn make_levels(rows: &[(f64, f64, f64, f64)]) -> LevelMap {
        rows.iter()
            .map(|&(p, v, b, a)| (OrderedFloat(p), PriceLevelStats::new(v, b, a)))
            .collect()
    }

    #[test]
    fn test_extremes() {
        let levels = make_levels(&[
            (100.0, 1.0, 0.0, 1.0),
            (100.25, 1.0, 0.0, 1.0),
            (100.5, 1.0, 0.0, 1.0),
            (100.75, 1.0, 0.0, 1.0),
            (101.0, 1.0, 0.0, 1.0),
        ]);
        let profile = LevelProfile::new(&levels);

        assert_eq!(profile.high_extremes(2), 3..5);
        assert_eq!(profile.low_extremes(2), 0..2);
        // Overlap when there are too few levels
        assert_eq!(profile.high_extremes(4), 1..5);
        assert_eq!(profile.low_extremes(9), 0..5);
        assert_eq!(profile.price(4), 101.0);
    }

    #[test]
    fn test_concentration_and_aggression() {
        let levels = make_levels(&[
            (100.0, 2.0, 2.0, 0.0),
            (100.25, 2.0, 1.0, 1.0),
            (100.5, 6.0, 0.0, 6.0),
        ]);
        let profile = LevelProfile::new(&levels);

        assert_relative_eq!(profile.concentration(2), 0.6);
        assert!(profile.has_concentration(profile.high_extremes(1), 0.5));
        assert!(!profile.has_concentration(profile.low_extremes(1), 0.5));
        assert_relative_eq!(profile.high_ask_aggression(1), 6.0 / 7.0);
        assert_relative_eq!(profile.low_bid_aggression(1), 2.0 / 3.0);
    }

    #[test]
    fn test_zero_totals_guarded() {
        let levels = make_levels(&[(100.0, 0.0, 0.0, 0.0), (100.25, 0.0, 0.0, 0.0)]);
        let profile = LevelProfile::new(&levels);
        assert_eq!(profile.concentration(0), 0.0);
        assert_eq!(profile.high_ask_aggression(1), 0.0);
        assert_eq!(profile.low_bid_aggression(1), 0.0);

        let empty = LevelProfile::new(&LevelMap::new());
        assert!(empty.is_empty());
        assert_eq!(empty.high_extremes(3), 0..0);
        assert_eq!(empty.high_ask_aggression(3), 0.0);
    }
}
