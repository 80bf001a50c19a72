//! Configuration structures for the trapped-orders pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::TimeSlot;

/// Main configuration for the research pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instrument configuration.
    pub instrument: InstrumentConfig,
    /// Bar cleaning configuration.
    pub cleaner: CleanerConfig,
    /// Trigger / classification thresholds for a single scan.
    pub trigger: TriggerConfig,
    /// Directional backtest configuration.
    pub reversal: ReversalConfig,
    /// Parameter sweep configuration.
    pub grid: GridConfig,
    /// Validation-window statistics configuration.
    pub window_analysis: WindowAnalysisConfig,
}

impl Config {
    /// Load a configuration from a JSON file. Missing sections take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::missing_input(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON form.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges across all sections.
    pub fn validate(&self) -> Result<()> {
        if !self.instrument.tick_size.is_finite() || self.instrument.tick_size <= 0.0 {
            return Err(Error::config("instrument.tick_size must be positive"));
        }
        if self.instrument.range_ticks == 0 {
            return Err(Error::config("instrument.range_ticks must be at least 1"));
        }
        self.trigger.validate()?;
        self.reversal.validate()?;

        if self.grid.n_extremes.iter().any(|&n| n == 0) {
            return Err(Error::config("grid.n_extremes values must be at least 1"));
        }
        for &v in self
            .grid
            .vol_thresholds
            .iter()
            .chain(self.grid.aggression_thresholds.iter())
        {
            check_fraction("grid threshold", v)?;
        }

        let wa = &self.window_analysis;
        if wa.min_window == 0 || wa.min_window > wa.max_window {
            return Err(Error::config(
                "window_analysis requires 0 < min_window <= max_window",
            ));
        }
        Ok(())
    }
}

fn check_fraction(name: &str, v: f64) -> Result<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(Error::config(format!("{name} {v} outside [0, 1]")))
    }
}

/// Instrument-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Instrument symbol (e.g., "ES").
    pub symbol: String,
    /// Tick size (minimum price increment).
    pub tick_size: f64,
    /// Range bar size in ticks.
    pub range_ticks: u32,
}

impl InstrumentConfig {
    /// Range bar size in price units.
    pub fn range_size(&self) -> f64 {
        self.tick_size * self.range_ticks as f64
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: "ES".to_string(),
            tick_size: 0.25,
            range_ticks: 8,
        }
    }
}

/// Bar cleaning configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Round decoded price keys to the tick grid before merging duplicates.
    pub snap_to_tick: bool,
    /// Remove zero-volume phantom bars from the cleaned output.
    pub drop_phantoms: bool,
}

/// Thresholds for trigger detection and classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Number of levels considered at each end of the bar.
    pub n_extremes: usize,
    /// Minimum share of bar volume at one extreme level.
    pub vol_threshold: f64,
    /// Minimum share of total ask (bid) volume in the top (bottom) extremes.
    pub aggression_threshold: f64,
    /// Maximum inner/outer volume ratio for an exhaustion pair.
    pub exhaustion_threshold: f64,
}

impl TriggerConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.n_extremes == 0 {
            return Err(Error::config("trigger.n_extremes must be at least 1"));
        }
        check_fraction("trigger.vol_threshold", self.vol_threshold)?;
        check_fraction("trigger.aggression_threshold", self.aggression_threshold)?;
        if self.exhaustion_threshold < 0.0 {
            return Err(Error::config("trigger.exhaustion_threshold must be non-negative"));
        }
        Ok(())
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            n_extremes: 3,
            vol_threshold: 0.3,
            aggression_threshold: 0.6,
            exhaustion_threshold: 0.1,
        }
    }
}

/// Directional backtest configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReversalConfig {
    /// Candidate validation windows, tried in order (first success wins).
    pub validation_windows: Vec<usize>,
    /// Distance beyond the trigger extreme that defines the stop.
    pub stop_tolerance: f64,
    /// Minimum bars after the trigger required to run the test.
    pub min_trailing_bars: usize,
}

impl ReversalConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.validation_windows.is_empty() || self.validation_windows.contains(&0) {
            return Err(Error::config(
                "reversal.validation_windows must be non-empty and non-zero",
            ));
        }
        if self.stop_tolerance < 0.0 {
            return Err(Error::config("reversal.stop_tolerance must be non-negative"));
        }
        Ok(())
    }
}

impl Default for ReversalConfig {
    fn default() -> Self {
        Self {
            validation_windows: vec![20, 10, 5],
            stop_tolerance: 0.5,
            min_trailing_bars: 25,
        }
    }
}

/// Parameter sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Values swept for `n_extremes`.
    pub n_extremes: Vec<usize>,
    /// Values swept for `vol_threshold`.
    pub vol_thresholds: Vec<f64>,
    /// Values swept for `aggression_threshold`.
    pub aggression_thresholds: Vec<f64>,
    /// Values swept for `exhaustion_threshold`.
    pub exhaustion_thresholds: Vec<f64>,
    /// Time slots each combination is evaluated on.
    pub time_slots: Vec<TimeSlot>,
    /// Combinations with fewer triggers are discarded.
    pub min_trades: usize,
    /// Loss charged to each trigger without a reversal in the profit factor.
    pub fixed_stop_loss: f64,
    /// Rows shown in the final report.
    pub top_n: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            n_extremes: vec![3],
            vol_thresholds: vec![0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.55, 0.6],
            aggression_thresholds: vec![0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.85, 0.9],
            exhaustion_thresholds: vec![0.05, 0.1, 0.15, 0.2, 0.25],
            time_slots: default_time_slots(),
            min_trades: 3,
            fixed_stop_loss: 2.0,
            top_n: 5,
        }
    }
}

fn default_time_slots() -> Vec<TimeSlot> {
    ["09:00-15:30", "15:30-18:00"]
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Validation-window statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowAnalysisConfig {
    /// Smallest window tested.
    pub min_window: usize,
    /// Largest window tested (also the edge buffer).
    pub max_window: usize,
    /// Windows for which success rates and the test order are reported.
    pub target_windows: Vec<usize>,
}

impl Default for WindowAnalysisConfig {
    fn default() -> Self {
        Self {
            min_window: 5,
            max_window: 25,
            target_windows: vec![5, 10, 20],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.instrument.range_size(), 2.0);
        assert_eq!(config.reversal.validation_windows, vec![20, 10, 5]);
        assert_eq!(config.reversal.stop_tolerance, 0.5);
        assert_eq!(config.reversal.min_trailing_bars, 25);
        assert_eq!(config.grid.time_slots.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"instrument": {"tick_size": 0.5, "range_ticks": 4}, "grid": {"time_slots": ["ALL"]}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.instrument.symbol, "ES");
        assert_eq!(config.instrument.range_size(), 2.0);
        assert_eq!(config.grid.time_slots, vec![TimeSlot::All]);
        assert_eq!(config.trigger.n_extremes, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.trigger.vol_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reversal.validation_windows.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.window_analysis.min_window = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_slots() {
        let config = Config::default();
        let json = config.to_json_pretty().unwrap();
        assert!(json.contains("09:00-15:30"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.grid.time_slots, config.grid.time_slots);
    }
}
