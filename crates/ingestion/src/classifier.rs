//! Tick side inference using bid/ask alignment.
//!
//! Classifies each print as buy-initiated (at or above the ask),
//! sell-initiated (at or below the bid) or ambiguous (inside the spread),
//! and keeps running statistics about the split.

use trapped_core::{Tick, TradeSide};

/// Statistics about tick classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationStats {
    /// Total ticks classified.
    pub total_ticks: u64,
    /// Ticks classified as buy.
    pub buy_ticks: u64,
    /// Ticks classified as sell.
    pub sell_ticks: u64,
    /// Ticks classified as ambiguous.
    pub ambiguous_ticks: u64,
    /// Total volume processed.
    pub total_volume: f64,
    /// Buy volume.
    pub buy_volume: f64,
    /// Sell volume.
    pub sell_volume: f64,
    /// Ambiguous volume.
    pub ambiguous_volume: f64,
}

impl ClassificationStats {
    /// Get the fraction of ambiguous volume.
    pub fn ambiguous_frac(&self) -> f64 {
        if self.total_volume > 0.0 {
            self.ambiguous_volume / self.total_volume
        } else {
            0.0
        }
    }

    /// Buy volume minus sell volume over everything seen.
    pub fn net_delta(&self) -> f64 {
        self.buy_volume - self.sell_volume
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Tick classifier that infers trade side from the quote carried on each tick.
#[derive(Debug, Clone, Default)]
pub struct TickClassifier {
    stats: ClassificationStats,
}

impl TickClassifier {
    /// Create a new tick classifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a single tick and record it in the statistics.
    pub fn classify(&mut self, tick: &Tick) -> TradeSide {
        let side = tick.side();

        self.stats.total_ticks += 1;
        self.stats.total_volume += tick.volume;

        match side {
            TradeSide::Buy => {
                self.stats.buy_ticks += 1;
                self.stats.buy_volume += tick.volume;
            }
            TradeSide::Sell => {
                self.stats.sell_ticks += 1;
                self.stats.sell_volume += tick.volume;
            }
            TradeSide::Ambiguous => {
                self.stats.ambiguous_ticks += 1;
                self.stats.ambiguous_volume += tick.volume;
            }
        }

        side
    }

    /// Get classification statistics.
    pub fn stats(&self) -> &ClassificationStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}
