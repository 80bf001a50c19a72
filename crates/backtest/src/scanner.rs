//! Per-parameter scan over a cleaned bar table.
//!
//! Every bar inside the time slot is run through the trigger detector; each
//! triggered bar is classified and backtested against the full table.

use serde::{Serialize, Serializer};
use trapped_core::config::{ReversalConfig, TriggerConfig};
use trapped_core::{
    Direction, ExhaustionType, ImbalanceCoherence, RangeBar, StopStatus, TimeSlot,
    TradeDirection, TriggerPosition, TriggerResult,
};
use trapped_features::PatternClassifier;
use trapped_ingestion::timefmt::serde_bar_time;
use tracing::{debug, info};

use crate::reversal::ReversalEngine;

/// Scans a bar table for triggered bars under one parameter set.
#[derive(Debug, Clone, Default)]
pub struct PatternScanner {
    engine: ReversalEngine,
}

impl PatternScanner {
    /// Create a scanner with the given backtest configuration.
    pub fn new(config: ReversalConfig) -> Self {
        Self {
            engine: ReversalEngine::new(config),
        }
    }

    /// Backtest engine used for triggered bars.
    pub fn engine(&self) -> &ReversalEngine {
        &self.engine
    }

    /// Classify and backtest every triggered bar whose open time is in `slot`.
    pub fn scan(&self, bars: &[RangeBar], params: &TriggerConfig, slot: TimeSlot) -> Vec<TriggerResult> {
        let classifier = PatternClassifier::new(*params);
        let mut results = Vec::new();

        for (idx, bar) in bars.iter().enumerate() {
            if !slot.contains(&bar.open_time) {
                continue;
            }
            let Some(pattern) = classifier.classify(bar) else {
                continue;
            };

            let reversal = match self.engine.evaluate(bars, idx, pattern.trigger_position) {
                Ok(reversal) => Some(reversal),
                Err(rejection) => {
                    debug!(idx, %rejection, "no reversal");
                    None
                }
            };

            results.push(TriggerResult {
                bar_index: idx,
                trigger_position: pattern.trigger_position,
                is_divergent: pattern.is_divergent,
                imbalances: pattern.imbalances,
                imbalance_coherence: pattern.imbalance_coherence,
                exhaustion: pattern.exhaustion,
                reversal,
            });
        }

        info!(
            bars = bars.len(),
            triggers = results.len(),
            reversals = results.iter().filter(|r| r.has_reversal()).count(),
            %slot,
            "scan complete"
        );
        results
    }

    /// Scan and flatten each result together with its bar.
    pub fn scan_records(
        &self,
        bars: &[RangeBar],
        params: &TriggerConfig,
        slot: TimeSlot,
    ) -> Vec<TriggerRecord> {
        self.scan(bars, params, slot)
            .iter()
            .filter_map(|result| bars.get(result.bar_index).map(|bar| TriggerRecord::new(bar, result)))
            .collect()
    }
}

fn label_or_none<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    match value {
        Some(v) => v.serialize(serializer),
        None => serializer.serialize_str("NONE"),
    }
}

/// One triggered bar as a flat report row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerRecord {
    pub bar_index: usize,
    #[serde(with = "serde_bar_time")]
    pub open_time: trapped_core::Timestamp,
    #[serde(with = "serde_bar_time")]
    pub close_time: trapped_core::Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub delta: f64,
    pub direction: Direction,

    pub trigger_position: TriggerPosition,
    pub is_divergent: bool,
    pub imbalance_high_x2: u32,
    pub imbalance_high_x3: u32,
    pub imbalance_high_x4: u32,
    pub imbalance_high_x5: u32,
    pub imbalance_low_x2: u32,
    pub imbalance_low_x3: u32,
    pub imbalance_low_x4: u32,
    pub imbalance_low_x5: u32,
    pub imbalance_coherence: ImbalanceCoherence,
    pub has_exhaustion: bool,
    pub exhaustion_type: ExhaustionType,
    pub exhaustion_ratio: f64,
    pub exhaustion_outer_price: Option<f64>,
    pub exhaustion_inner_price: Option<f64>,

    pub has_reversal: bool,
    pub before_window: Option<usize>,
    pub after_window: Option<usize>,
    /// Zero without a reversal.
    pub max_excursion: f64,
    /// Zero without a reversal.
    pub excursion_bars: usize,
    #[serde(serialize_with = "label_or_none")]
    pub stop_status: Option<StopStatus>,
    #[serde(serialize_with = "label_or_none")]
    pub trade_direction: Option<TradeDirection>,
}

impl TriggerRecord {
    /// Flatten a result with the bar it was computed on.
    pub fn new(bar: &RangeBar, result: &TriggerResult) -> Self {
        let [high_x2, high_x3, high_x4, high_x5] = result.imbalances.high;
        let [low_x2, low_x3, low_x4, low_x5] = result.imbalances.low;
        let reversal = result.reversal.as_ref();

        Self {
            bar_index: result.bar_index,
            open_time: bar.open_time,
            close_time: bar.close_time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            delta: bar.delta,
            direction: bar.direction,

            trigger_position: result.trigger_position,
            is_divergent: result.is_divergent,
            imbalance_high_x2: high_x2,
            imbalance_high_x3: high_x3,
            imbalance_high_x4: high_x4,
            imbalance_high_x5: high_x5,
            imbalance_low_x2: low_x2,
            imbalance_low_x3: low_x3,
            imbalance_low_x4: low_x4,
            imbalance_low_x5: low_x5,
            imbalance_coherence: result.imbalance_coherence,
            has_exhaustion: result.exhaustion.has_exhaustion,
            exhaustion_type: result.exhaustion.kind,
            exhaustion_ratio: result.exhaustion.ratio,
            exhaustion_outer_price: result.exhaustion.levels.map(|(outer, _)| outer),
            exhaustion_inner_price: result.exhaustion.levels.map(|(_, inner)| inner),

            has_reversal: reversal.is_some(),
            before_window: reversal.map(|r| r.before_window),
            after_window: reversal.map(|r| r.after_window),
            max_excursion: reversal.map_or(0.0, |r| r.max_excursion),
            excursion_bars: reversal.map_or(0, |r| r.excursion_bars),
            stop_status: reversal.map(|r| r.stop_status),
            trade_direction: reversal.map(|r| r.trade_direction),
        }
    }

    /// Coherence graded `COHERENT`.
    pub fn is_coherent(&self) -> bool {
        self.imbalance_coherence == ImbalanceCoherence::Coherent
    }
}
