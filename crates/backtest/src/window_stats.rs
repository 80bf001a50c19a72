//! Validation-window statistics.
//!
//! Treats every bar as a hypothetical HIGH and LOW trigger and measures the
//! longest before-window and after-window that would validate it. The
//! distributions of those lengths give an empirical test order for the
//! backtest's validation windows.
//!
//! Percentiles come from `statrs`, which interpolates between order
//! statistics differently from a linear (numpy-style) estimator; values can
//! differ slightly on small samples.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use trapped_core::config::WindowAnalysisConfig;
use trapped_core::{Error, RangeBar, Result, Timestamp};
use tracing::info;

/// Count of leading bars that do not break the rule, capped at `max`.
fn clear_run<'a>(
    bars: impl Iterator<Item = &'a RangeBar>,
    breaks: impl Fn(&RangeBar) -> bool,
    max: usize,
) -> usize {
    bars.take(max).take_while(|b| !breaks(b)).count()
}

/// Percentile summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Distribution of validated window lengths for one rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowDistribution {
    pub samples: usize,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    pub percentiles: Percentiles,
    /// Bars where even the smallest window failed.
    pub zero: usize,
    /// Bars whose validated length is at least the key.
    pub valid: BTreeMap<usize, usize>,
}

impl WindowDistribution {
    /// Summarize window lengths; `thresholds` select the `valid` counts.
    pub fn from_lengths(lengths: &[usize], thresholds: &[usize]) -> Self {
        let valid = thresholds
            .iter()
            .map(|&t| (t, lengths.iter().filter(|&&l| l >= t).count()))
            .collect();
        let zero = lengths.iter().filter(|&&l| l == 0).count();
        if lengths.is_empty() {
            return Self {
                valid,
                ..Default::default()
            };
        }

        let values: Vec<f64> = lengths.iter().map(|&l| l as f64).collect();
        let mut data = Data::new(values.clone());
        Self {
            samples: lengths.len(),
            mean: values.iter().mean(),
            median: data.median(),
            std: values.iter().population_std_dev(),
            percentiles: Percentiles {
                p25: data.percentile(25),
                p50: data.percentile(50),
                p75: data.percentile(75),
                p90: data.percentile(90),
                p95: data.percentile(95),
            },
            zero,
            valid,
        }
    }

    /// Share of samples validated at `window` or longer.
    pub fn success_rate(&self, window: usize) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        let hits = self.valid.get(&window).copied().unwrap_or(0);
        hits as f64 / self.samples as f64
    }
}

/// Before and after distributions for one trigger side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideWindowStats {
    pub before: WindowDistribution,
    pub after: WindowDistribution,
}

/// Window statistics for both trigger sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowAnalysis {
    pub min_window: usize,
    pub max_window: usize,
    pub stop_tolerance: f64,
    #[serde(rename = "HIGH")]
    pub high: SideWindowStats,
    #[serde(rename = "LOW")]
    pub low: SideWindowStats,
}

/// Recommended validation order for one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowRecommendation {
    pub before_order: Vec<usize>,
    pub after_order: Vec<usize>,
    pub before_success_rates: BTreeMap<usize, f64>,
    pub after_success_rates: BTreeMap<usize, f64>,
    pub before_median: f64,
    pub after_median: f64,
}

/// Targets sorted by success rate, highest first; ties keep target order.
fn order_by_success(dist: &WindowDistribution, targets: &[usize]) -> Vec<usize> {
    let mut order = targets.to_vec();
    order.sort_by(|a, b| dist.success_rate(*b).total_cmp(&dist.success_rate(*a)));
    order
}

impl WindowRecommendation {
    fn from_side(stats: &SideWindowStats, targets: &[usize]) -> Self {
        let rates = |dist: &WindowDistribution| {
            targets
                .iter()
                .map(|&w| (w, dist.success_rate(w)))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            before_order: order_by_success(&stats.before, targets),
            after_order: order_by_success(&stats.after, targets),
            before_success_rates: rates(&stats.before),
            after_success_rates: rates(&stats.after),
            before_median: stats.before.median,
            after_median: stats.after.median,
        }
    }
}

/// Recommendations for both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowRecommendations {
    #[serde(rename = "HIGH")]
    pub high: WindowRecommendation,
    #[serde(rename = "LOW")]
    pub low: WindowRecommendation,
}

impl WindowAnalysis {
    /// Test order for the given target windows.
    pub fn recommendations(&self, targets: &[usize]) -> WindowRecommendations {
        WindowRecommendations {
            high: WindowRecommendation::from_side(&self.high, targets),
            low: WindowRecommendation::from_side(&self.low, targets),
        }
    }
}

/// Saved output of a window analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub generated_at: Timestamp,
    pub stop_tolerance: f64,
    pub analysis: WindowAnalysis,
    pub recommendations: WindowRecommendations,
}

impl WindowReport {
    pub fn new(analysis: WindowAnalysis, targets: &[usize], generated_at: Timestamp) -> Self {
        Self {
            generated_at,
            stop_tolerance: analysis.stop_tolerance,
            recommendations: analysis.recommendations(targets),
            analysis,
        }
    }
}

/// Computes window statistics over a bar table.
#[derive(Debug, Clone)]
pub struct WindowAnalyzer {
    config: WindowAnalysisConfig,
    stop_tolerance: f64,
}

impl WindowAnalyzer {
    pub fn new(config: WindowAnalysisConfig, stop_tolerance: f64) -> Self {
        Self {
            config,
            stop_tolerance,
        }
    }

    pub fn config(&self) -> &WindowAnalysisConfig {
        &self.config
    }

    /// Longest validated length, or 0 if the smallest window fails.
    fn validated(&self, run: usize) -> usize {
        if run >= self.config.min_window {
            run.min(self.config.max_window)
        } else {
            0
        }
    }

    /// (before, after) lengths for a HIGH trigger at `idx`.
    fn high_lengths(&self, bars: &[RangeBar], idx: usize) -> (usize, usize) {
        let max = self.config.max_window;
        let high = bars[idx].high;
        let stop = high + self.stop_tolerance;
        let before = clear_run(bars[..idx].iter().rev(), |b| b.high > high, max);
        let after = clear_run(bars[idx + 1..].iter(), |b| b.high > stop, max);
        (self.validated(before), self.validated(after))
    }

    /// (before, after) lengths for a LOW trigger at `idx`.
    fn low_lengths(&self, bars: &[RangeBar], idx: usize) -> (usize, usize) {
        let max = self.config.max_window;
        let low = bars[idx].low;
        let stop = low - self.stop_tolerance;
        let before = clear_run(bars[..idx].iter().rev(), |b| b.low < low, max);
        let after = clear_run(bars[idx + 1..].iter(), |b| b.low < stop, max);
        (self.validated(before), self.validated(after))
    }

    /// Thresholds reported in the `valid` counts.
    fn thresholds(&self) -> Vec<usize> {
        let mut t = self.config.target_windows.clone();
        t.push(self.config.min_window);
        t.push(self.config.max_window);
        t.sort_unstable();
        t.dedup();
        t
    }

    /// Analyze every bar at least `max_window` bars away from both ends.
    pub fn analyze(&self, bars: &[RangeBar]) -> Result<WindowAnalysis> {
        let edge = self.config.max_window;
        if bars.len() <= 2 * edge {
            return Err(Error::insufficient_data(format!(
                "window analysis needs more than {} bars, got {}",
                2 * edge,
                bars.len()
            )));
        }

        let span = edge..bars.len() - edge;
        let mut high = (Vec::with_capacity(span.len()), Vec::with_capacity(span.len()));
        let mut low = (Vec::with_capacity(span.len()), Vec::with_capacity(span.len()));
        for idx in span {
            let (b, a) = self.high_lengths(bars, idx);
            high.0.push(b);
            high.1.push(a);
            let (b, a) = self.low_lengths(bars, idx);
            low.0.push(b);
            low.1.push(a);
        }

        let thresholds = self.thresholds();
        let side = |(before, after): &(Vec<usize>, Vec<usize>)| SideWindowStats {
            before: WindowDistribution::from_lengths(before, &thresholds),
            after: WindowDistribution::from_lengths(after, &thresholds),
        };
        let analysis = WindowAnalysis {
            min_window: self.config.min_window,
            max_window: self.config.max_window,
            stop_tolerance: self.stop_tolerance,
            high: side(&high),
            low: side(&low),
        };
        info!(
            samples = analysis.high.before.samples,
            high_before_median = analysis.high.before.median,
            low_before_median = analysis.low.before.median,
            "window analysis complete"
        );
        Ok(analysis)
    }

    /// Analyze and attach recommendations for the configured targets.
    pub fn report(&self, bars: &[RangeBar], generated_at: Timestamp) -> Result<WindowReport> {
        let analysis = self.analyze(bars)?;
        Ok(WindowReport::new(
            analysis,
            &self.config.target_windows,
            generated_at,
        ))
    }
}
