//! Canonicalization of aggregated bars.
//!
//! Merges duplicate price keys, optionally snaps prices to the tick grid,
//! and recomputes bar volume and delta from the levels. Cleaning a clean
//! bar changes nothing.

use ordered_float::OrderedFloat;
use trapped_core::config::CleanerConfig;
use trapped_core::{LevelMap, PriceLevelStats, RangeBar};
use tracing::{info, warn};

use crate::bar_io::RawBarRecord;

/// Round a price to the nearest multiple of `tick_size`.
#[inline]
pub fn snap_to_tick(price: f64, tick_size: f64) -> f64 {
    (price / tick_size).round() * tick_size
}

/// Counters from a cleaning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    /// Bars offered to the cleaner.
    pub bars_in: usize,
    /// Bars emitted.
    pub bars_out: usize,
    /// Bars skipped because their levels could not be decoded.
    pub skipped: usize,
    /// Phantom bars removed.
    pub phantoms_dropped: usize,
    /// Level entries folded into an existing price.
    pub merged_levels: usize,
}

/// Bar cleaner.
#[derive(Debug, Clone)]
pub struct BarCleaner {
    /// Snap grid, if enabled.
    snap_tick: Option<f64>,
    drop_phantoms: bool,
    stats: CleanStats,
}

impl BarCleaner {
    /// Create a cleaner from config.
    pub fn new(config: &CleanerConfig, tick_size: f64) -> Self {
        let snap_tick = (config.snap_to_tick && tick_size > 0.0).then_some(tick_size);
        Self {
            snap_tick,
            drop_phantoms: config.drop_phantoms,
            stats: CleanStats::default(),
        }
    }

    /// Cleaning statistics.
    pub fn stats(&self) -> &CleanStats {
        &self.stats
    }

    /// Merge level entries into a map with unique, sorted keys.
    pub fn merge_levels(
        &mut self,
        entries: impl IntoIterator<Item = (f64, PriceLevelStats)>,
    ) -> LevelMap {
        let mut levels = LevelMap::new();
        for (price, level) in entries {
            let price = match self.snap_tick {
                Some(tick) => snap_to_tick(price, tick),
                None => price,
            };
            match levels.entry(OrderedFloat(price)) {
                std::collections::btree_map::Entry::Occupied(mut e) => {
                    e.get_mut().merge(&level);
                    self.stats.merged_levels += 1;
                }
                std::collections::btree_map::Entry::Vacant(e) => {
                    e.insert(level);
                }
            }
        }
        levels
    }

    /// Rebuild a bar around a cleaned level map.
    fn finish_bar(&mut self, mut bar: RangeBar, levels: LevelMap) -> Option<RangeBar> {
        bar.volume = levels.values().map(|l| l.volume).sum();
        bar.levels = levels;
        bar.delta = bar.level_delta();

        if self.drop_phantoms && bar.is_phantom() {
            self.stats.phantoms_dropped += 1;
            return None;
        }
        self.stats.bars_out += 1;
        Some(bar)
    }

    /// Clean one in-memory bar.
    pub fn clean_bar(&mut self, bar: &RangeBar) -> Option<RangeBar> {
        self.stats.bars_in += 1;
        let levels = self.merge_levels(bar.levels.iter().map(|(p, l)| (p.0, *l)));
        self.finish_bar(bar.clone(), levels)
    }

    /// Clean a sequence of in-memory bars.
    pub fn clean_bars(&mut self, bars: &[RangeBar]) -> Vec<RangeBar> {
        let out: Vec<RangeBar> = bars.iter().filter_map(|b| self.clean_bar(b)).collect();
        info!(bars_in = bars.len(), bars_out = out.len(), "bars cleaned");
        out
    }

    /// Clean raw table rows. Rows whose level map cannot be decoded are
    /// skipped.
    pub fn clean_records(&mut self, records: &[RawBarRecord]) -> Vec<RangeBar> {
        let mut out = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            self.stats.bars_in += 1;
            let entries = match record.level_entries() {
                Ok(entries) => entries,
                Err(e) => {
                    self.stats.skipped += 1;
                    warn!(row = i + 1, open_time = %record.open_time, error = %e, "skipping bar");
                    continue;
                }
            };
            let levels = self.merge_levels(entries);
            let bar = RangeBar {
                open_time: record.open_time,
                close_time: record.close_time,
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
                volume: record.volume,
                delta: 0.0,
                direction: record.direction,
                delta_marks: record.delta_marks(),
                levels: LevelMap::new(),
            };
            out.extend(self.finish_bar(bar, levels));
        }
        info!(
            rows = records.len(),
            bars_out = out.len(),
            skipped = self.stats.skipped,
            merged = self.stats.merged_levels,
            "raw bars cleaned"
        );
        out
    }
}

impl Default for BarCleaner {
    fn default() -> Self {
        Self::new(&CleanerConfig::default(), 0.0)
    }
}

/// Clean bars with the default settings.
pub fn clean_bars(bars: &[RangeBar]) -> Vec<RangeBar> {
    BarCleaner::default().clean_bars(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use trapped_core::{DeltaMarks, Direction};

    fn make_record(price_stats: &str) -> RawBarRecord {
        let t = NaiveDate::from_ymd_opt(2025, 3, 12)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        RawBarRecord {
            open_time: t,
            close_time: t,
            open: 5000.0,
            high: 5002.0,
            low: 5000.0,
            close: 5002.0,
            volume: 99.0,
            delta_open: 0.0,
            delta_high: 0.0,
            delta_low: 0.0,
            delta_close: 0.0,
            direction: Direction::Up,
            price_stats: price_stats.to_string(),
        }
    }

    #[test]
    fn test_duplicates_merged_and_totals_recomputed() {
        let mut cleaner = BarCleaner::default();
        let records = vec![make_record(
            "{5000.0: {'volume': 2, 'bid_volume': 2, 'ask_volume': 0}, \
              5002.0: {'volume': 5, 'bid_volume': 0, 'ask_volume': 5}, \
              5000.0: {'volume': 1, 'bid_volume': 0, 'ask_volume': 1}}",
        )];
        let bars = cleaner.clean_records(&records);

        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.levels.len(), 2);
        assert_eq!(bar.levels[&OrderedFloat(5000.0)], PriceLevelStats::new(3.0, 2.0, 1.0));
        assert_eq!(bar.volume, 8.0);
        assert_eq!(bar.delta, 4.0);
        assert_eq!(cleaner.stats().merged_levels, 1);
    }

    #[test]
    fn test_unparseable_bar_skipped() {
        let mut cleaner = BarCleaner::default();
        let records = vec![
            make_record("{5000.0: {'volume': 1}}"),
            make_record("{5000.0: [oops"),
        ];
        let bars = cleaner.clean_records(&records);
        assert_eq!(bars.len(), 1);
        assert_eq!(cleaner.stats().skipped, 1);
        assert_eq!(cleaner.stats().bars_in, 2);
    }

    #[test]
    fn test_snap_to_tick() {
        let config = CleanerConfig {
            snap_to_tick: true,
            drop_phantoms: false,
        };
        let mut cleaner = BarCleaner::new(&config, 0.25);
        let levels = cleaner.merge_levels(vec![
            (5000.2500000001, PriceLevelStats::new(1.0, 0.0, 1.0)),
            (5000.25, PriceLevelStats::new(2.0, 2.0, 0.0)),
        ]);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[&OrderedFloat(5000.25)].volume, 3.0);
    }

    #[test]
    fn test_idempotent() {
        let mut cleaner = BarCleaner::default();
        let once = cleaner.clean_records(&[make_record(
            "{5000.0: {'volume': 2, 'bid_volume': 2}, 5000.0: {'volume': 3, 'ask_volume': 3}}",
        )]);
        let twice = clean_bars(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_drop_phantoms() {
        let config = CleanerConfig {
            snap_to_tick: false,
            drop_phantoms: true,
        };
        let mut cleaner = BarCleaner::new(&config, 0.25);
        let mut phantom = make_record("{}");
        phantom.volume = 0.0;
        phantom.delta_open = 7.0;
        let bars = cleaner.clean_records(&[make_record("{5000.0: {'volume': 1}}"), phantom]);
        assert_eq!(bars.len(), 1);
        assert_eq!(cleaner.stats().phantoms_dropped, 1);

        // Kept by default, with the marks carried through
        let mut keep = BarCleaner::default();
        let mut phantom = make_record("{}");
        phantom.delta_close = 7.0;
        let bars = keep.clean_records(&[phantom]);
        assert_eq!(bars.len(), 1);
        assert!(bars[0].is_phantom());
        assert_eq!(bars[0].delta_marks, DeltaMarks { close: 7.0, ..Default::default() });
    }

    #[test]
    fn test_default_clean_bars_only_merges() {
        let mut phantom = make_record("{}");
        phantom.volume = 0.0;
        let raw = BarCleaner::default().clean_records(&[
            make_record("{5000.1: {'volume': 1, 'bid_volume': 0, 'ask_volume': 1}, 5000.1: {'volume': 2, 'bid_volume': 2, 'ask_volume': 0}}"),
            phantom,
        ]);

        let bars = clean_bars(&raw);
        assert_eq!(bars.len(), 2);
        // Off-grid price left as is, duplicates summed
        let level = bars[0].levels[&OrderedFloat(5000.1)];
        assert_eq!(level.volume, 3.0);
        assert_eq!(bars[0].delta, -1.0);
        assert!(bars[1].is_phantom());
    }
}
