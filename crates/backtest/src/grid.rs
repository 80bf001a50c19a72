//! Parameter grid search.
//!
//! Runs one scan per combination of the configured threshold lists and time
//! slots, keeps combinations with enough triggers and ranks them by score.

use serde::{Deserialize, Serialize};
use trapped_core::config::{GridConfig, ReversalConfig, TriggerConfig};
use trapped_core::{RangeBar, TimeSlot};
use tracing::{debug, info};

use crate::metrics::ScanSummary;
use crate::scanner::PatternScanner;

/// One point of the parameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    pub trigger: TriggerConfig,
    pub time_slot: TimeSlot,
}

/// Scan summary of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRow {
    pub params: GridParams,
    pub summary: ScanSummary,
}

/// Flat CSV form of a [`GridRow`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCsvRow {
    pub n_extremes: usize,
    pub vol_threshold: f64,
    pub aggression_threshold: f64,
    pub exhaustion_threshold: f64,
    pub time_slot: TimeSlot,

    pub n_trades: usize,
    pub n_reversals: usize,
    pub winrate: f64,
    pub avg_profit: f64,
    pub max_profit: f64,
    pub avg_bars: f64,
    pub profit_factor: f64,
    pub final_score: f64,
    pub n_divergent: usize,
    pub n_non_divergent: usize,
    pub winrate_divergent: f64,
    pub winrate_non_divergent: f64,
    pub divergent_rate: f64,
    pub coherent_rate: f64,
    pub exhaustion_rate: f64,
    pub high_trigger_rate: f64,
    pub low_trigger_rate: f64,
    pub both_trigger_rate: f64,

    pub winner_divergent_rate: f64,
    pub winner_coherent_rate: f64,
    pub winner_exhaustion_rate: f64,
    pub winner_high_trigger_rate: f64,
    pub winner_avg_volume: f64,
    pub winner_avg_delta: f64,
    pub loser_divergent_rate: f64,
    pub loser_coherent_rate: f64,
    pub loser_exhaustion_rate: f64,
    pub loser_high_trigger_rate: f64,
    pub loser_avg_volume: f64,
    pub loser_avg_delta: f64,
}

impl From<&GridRow> for GridCsvRow {
    fn from(row: &GridRow) -> Self {
        let p = &row.params.trigger;
        let s = &row.summary;
        let (w, l) = (&s.winner_profile, &s.loser_profile);
        Self {
            n_extremes: p.n_extremes,
            vol_threshold: p.vol_threshold,
            aggression_threshold: p.aggression_threshold,
            exhaustion_threshold: p.exhaustion_threshold,
            time_slot: row.params.time_slot,

            n_trades: s.n_trades,
            n_reversals: s.n_reversals,
            winrate: s.winrate,
            avg_profit: s.avg_profit,
            max_profit: s.max_profit,
            avg_bars: s.avg_bars,
            profit_factor: s.profit_factor,
            final_score: s.final_score,
            n_divergent: s.n_divergent,
            n_non_divergent: s.n_non_divergent,
            winrate_divergent: s.winrate_divergent,
            winrate_non_divergent: s.winrate_non_divergent,
            divergent_rate: s.divergent_rate,
            coherent_rate: s.coherent_rate,
            exhaustion_rate: s.exhaustion_rate,
            high_trigger_rate: s.high_trigger_rate,
            low_trigger_rate: s.low_trigger_rate,
            both_trigger_rate: s.both_trigger_rate,

            winner_divergent_rate: w.divergent_rate,
            winner_coherent_rate: w.coherent_rate,
            winner_exhaustion_rate: w.exhaustion_rate,
            winner_high_trigger_rate: w.high_trigger_rate,
            winner_avg_volume: w.avg_volume,
            winner_avg_delta: w.avg_delta,
            loser_divergent_rate: l.divergent_rate,
            loser_coherent_rate: l.coherent_rate,
            loser_exhaustion_rate: l.exhaustion_rate,
            loser_high_trigger_rate: l.high_trigger_rate,
            loser_avg_volume: l.avg_volume,
            loser_avg_delta: l.avg_delta,
        }
    }
}

/// Mean parameters and metrics of the best-ranked rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identikit {
    pub rows: usize,
    pub vol_threshold: f64,
    pub aggression_threshold: f64,
    pub exhaustion_threshold: f64,
    pub winrate: f64,
    pub avg_profit: f64,
    pub profit_factor: f64,
    pub avg_bars: f64,
    pub divergent_rate: f64,
    pub coherent_rate: f64,
    pub exhaustion_rate: f64,
    pub high_trigger_rate: f64,
    pub low_trigger_rate: f64,
    pub both_trigger_rate: f64,
}

impl Identikit {
    fn from_rows(rows: &[GridRow]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let n = rows.len() as f64;
        let avg = |f: fn(&GridRow) -> f64| rows.iter().map(f).sum::<f64>() / n;
        Some(Self {
            rows: rows.len(),
            vol_threshold: avg(|r| r.params.trigger.vol_threshold),
            aggression_threshold: avg(|r| r.params.trigger.aggression_threshold),
            exhaustion_threshold: avg(|r| r.params.trigger.exhaustion_threshold),
            winrate: avg(|r| r.summary.winrate),
            avg_profit: avg(|r| r.summary.avg_profit),
            profit_factor: avg(|r| r.summary.profit_factor),
            avg_bars: avg(|r| r.summary.avg_bars),
            divergent_rate: avg(|r| r.summary.divergent_rate),
            coherent_rate: avg(|r| r.summary.coherent_rate),
            exhaustion_rate: avg(|r| r.summary.exhaustion_rate),
            high_trigger_rate: avg(|r| r.summary.high_trigger_rate),
            low_trigger_rate: avg(|r| r.summary.low_trigger_rate),
            both_trigger_rate: avg(|r| r.summary.both_trigger_rate),
        })
    }
}

/// Ranked grid search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridReport {
    /// Combinations evaluated, including discarded ones.
    pub combinations: usize,
    rows: Vec<GridRow>,
}

impl GridReport {
    /// Keep rows with at least `min_trades` triggers, best score first.
    pub fn from_rows(mut rows: Vec<GridRow>, combinations: usize, min_trades: usize) -> Self {
        rows.retain(|r| r.summary.n_trades >= min_trades);
        rows.sort_by(|a, b| b.summary.final_score.total_cmp(&a.summary.final_score));
        Self { combinations, rows }
    }

    /// All kept rows, best first.
    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    /// The best `n` rows.
    pub fn top(&self, n: usize) -> &[GridRow] {
        &self.rows[..n.min(self.rows.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Mean profile of the best `n` rows.
    pub fn identikit(&self, n: usize) -> Option<Identikit> {
        Identikit::from_rows(self.top(n))
    }

    /// Most frequent time slot among the best `n` rows; ties go to the
    /// better-ranked slot.
    pub fn best_time_slot(&self, n: usize) -> Option<TimeSlot> {
        let top = self.top(n);
        let mut best: Option<(TimeSlot, usize)> = None;
        for row in top {
            let slot = row.params.time_slot;
            let count = top.iter().filter(|r| r.params.time_slot == slot).count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((slot, count));
            }
        }
        best.map(|(slot, _)| slot)
    }

    /// Rows in flat CSV form.
    pub fn csv_rows(&self) -> Vec<GridCsvRow> {
        self.rows.iter().map(GridCsvRow::from).collect()
    }
}

/// Grid search driver.
#[derive(Debug, Clone)]
pub struct GridSearch {
    config: GridConfig,
    scanner: PatternScanner,
}

impl GridSearch {
    /// Create a search over `config` using the given backtest settings.
    pub fn new(config: GridConfig, reversal: ReversalConfig) -> Self {
        Self {
            config,
            scanner: PatternScanner::new(reversal),
        }
    }

    /// Grid configuration.
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Every parameter combination, in sweep order.
    pub fn combinations(&self) -> Vec<GridParams> {
        let c = &self.config;
        let mut out = Vec::with_capacity(self.len());
        for &n_extremes in &c.n_extremes {
            for &vol_threshold in &c.vol_thresholds {
                for &aggression_threshold in &c.aggression_thresholds {
                    for &exhaustion_threshold in &c.exhaustion_thresholds {
                        for &time_slot in &c.time_slots {
                            out.push(GridParams {
                                trigger: TriggerConfig {
                                    n_extremes,
                                    vol_threshold,
                                    aggression_threshold,
                                    exhaustion_threshold,
                                },
                                time_slot,
                            });
                        }
                    }
                }
            }
        }
        out
    }

    /// Number of combinations.
    pub fn len(&self) -> usize {
        let c = &self.config;
        c.n_extremes.len()
            * c.vol_thresholds.len()
            * c.aggression_thresholds.len()
            * c.exhaustion_thresholds.len()
            * c.time_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate one combination.
    pub fn evaluate(&self, bars: &[RangeBar], params: GridParams) -> Option<GridRow> {
        let records = self
            .scanner
            .scan_records(bars, &params.trigger, params.time_slot);
        ScanSummary::from_records(&records, self.config.fixed_stop_loss)
            .map(|summary| GridRow { params, summary })
    }

    /// Run the full sweep.
    pub fn run(&self, bars: &[RangeBar]) -> GridReport {
        self.run_with_progress(bars, |_, _, _| {})
    }

    /// Run the full sweep, calling `progress(done, total, row)` after each
    /// combination.
    pub fn run_with_progress<F>(&self, bars: &[RangeBar], mut progress: F) -> GridReport
    where
        F: FnMut(usize, usize, Option<&GridRow>),
    {
        let combinations = self.combinations();
        let total = combinations.len();
        let mut rows = Vec::new();

        for (i, params) in combinations.into_iter().enumerate() {
            let row = self.evaluate(bars, params);
            if let Some(row) = &row {
                debug!(
                    vol = params.trigger.vol_threshold,
                    agg = params.trigger.aggression_threshold,
                    exh = params.trigger.exhaustion_threshold,
                    slot = %params.time_slot,
                    trades = row.summary.n_trades,
                    score = row.summary.final_score,
                    "combination evaluated"
                );
            }
            progress(i + 1, total, row.as_ref());
            rows.extend(row);
        }

        let report = GridReport::from_rows(rows, total, self.config.min_trades);
        info!(
            combinations = total,
            kept = report.rows().len(),
            min_trades = self.config.min_trades,
            "grid search complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tests::make_triggered_series;

    fn make_grid(vols: Vec<f64>, slots: Vec<TimeSlot>, min_trades: usize) -> GridConfig {
        GridConfig {
            n_extremes: vec![3],
            vol_thresholds: vols,
            aggression_thresholds: vec![0.6],
            exhaustion_thresholds: vec![0.1],
            time_slots: slots,
            min_trades,
            fixed_stop_loss: 2.0,
            top_n: 5,
        }
    }

    #[test]
    fn test_combinations_order() {
        let mut grid = make_grid(vec![0.2, 0.3], vec![TimeSlot::All], 1);
        grid.aggression_thresholds = vec![0.5, 0.6, 0.7];
        let search = GridSearch::new(grid, ReversalConfig::default());

        let combos = search.combinations();
        assert_eq!(combos.len(), 6);
        assert_eq!(search.len(), 6);
        assert_eq!(combos[0].trigger.vol_threshold, 0.2);
        assert_eq!(combos[1].trigger.aggression_threshold, 0.6);
        assert_eq!(combos[3].trigger.vol_threshold, 0.3);

        let full = GridSearch::new(GridConfig::default(), ReversalConfig::default());
        assert_eq!(full.len(), 9 * 8 * 5 * 2);
    }

    #[test]
    fn test_run_filters_by_min_trades() {
        let bars = make_triggered_series(60, 30);
        let search = GridSearch::new(make_grid(vec![0.3, 0.9], vec![TimeSlot::All], 1), ReversalConfig::default());

        let mut calls = 0;
        let report = search.run_with_progress(&bars, |done, total, _| {
            calls += 1;
            assert_eq!(total, 2);
            assert!(done <= total);
        });
        assert_eq!(calls, 2);
        assert_eq!(report.combinations, 2);
        // Only the 0.3 threshold triggers
        assert_eq!(report.rows().len(), 1);
        assert_eq!(report.rows()[0].params.trigger.vol_threshold, 0.3);

        let strict = GridSearch::new(make_grid(vec![0.3], vec![TimeSlot::All], 3), ReversalConfig::default());
        let report = strict.run(&bars);
        assert!(report.is_empty());
        assert!(report.identikit(5).is_none());
        assert!(report.best_time_slot(5).is_none());
    }

    #[test]
    fn test_ranking_and_identikit() {
        let bars = make_triggered_series(60, 30);
        let search = GridSearch::new(make_grid(vec![0.3], vec![TimeSlot::All], 1), ReversalConfig::default());
        let base = search.run(&bars).rows()[0].clone();

        let slot: TimeSlot = "09:00-15:30".parse().unwrap();
        let mut rows = Vec::new();
        for (score, vol, time_slot) in [
            (1.0, 0.2, TimeSlot::All),
            (3.0, 0.4, slot),
            (2.0, 0.3, slot),
        ] {
            let mut row = base.clone();
            row.summary.final_score = score;
            row.params.trigger.vol_threshold = vol;
            row.params.time_slot = time_slot;
            rows.push(row);
        }
        let report = GridReport::from_rows(rows, 3, 1);

        let scores: Vec<f64> = report.rows().iter().map(|r| r.summary.final_score).collect();
        assert_eq!(scores, vec![3.0, 2.0, 1.0]);
        assert_eq!(report.top(2).len(), 2);
        assert_eq!(report.top(10).len(), 3);

        let kit = report.identikit(2).unwrap();
        assert_eq!(kit.rows, 2);
        assert!((kit.vol_threshold - 0.35).abs() < 1e-10);
        assert_eq!(report.best_time_slot(3), Some(slot));
        assert_eq!(report.best_time_slot(1), Some(slot));
    }

    #[test]
    fn test_csv_rows_flatten_profiles() {
        let bars = make_triggered_series(60, 30);
        let search = GridSearch::new(make_grid(vec![0.3], vec![TimeSlot::All], 1), ReversalConfig::default());
        let report = search.run(&bars);
        let csv_rows = report.csv_rows();

        assert_eq!(csv_rows.len(), 1);
        let row = &csv_rows[0];
        assert_eq!(row.n_trades, 1);
        assert_eq!(row.winrate, 100.0);
        assert_eq!(row.winner_high_trigger_rate, 100.0);
        assert_eq!(row.loser_avg_volume, 0.0);
        assert_eq!(row.time_slot, TimeSlot::All);
    }
}
