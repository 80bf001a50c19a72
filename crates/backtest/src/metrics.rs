//! Scan summary metrics.
//!
//! Aggregates the trigger records of one parameter set into win rates,
//! excursion statistics, quality rates and a composite score. Rates are
//! percentages in `[0, 100]`.

use serde::{Deserialize, Serialize};
use trapped_core::TriggerPosition;

use crate::scanner::TriggerRecord;

/// Percentage of records matching `pred`; 0 for an empty slice.
fn rate(records: &[&TriggerRecord], pred: impl Fn(&TriggerRecord) -> bool) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let hits = records.iter().filter(|r| pred(r)).count();
    hits as f64 / records.len() as f64 * 100.0
}

/// Mean of `value` over the records; 0 for an empty slice.
fn mean(records: &[&TriggerRecord], value: impl Fn(&TriggerRecord) -> f64) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records.iter().map(|r| value(r)).sum::<f64>() / records.len() as f64
}

/// Characteristics of a subset of triggers (winners or losers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProfile {
    pub divergent_rate: f64,
    pub coherent_rate: f64,
    pub exhaustion_rate: f64,
    pub high_trigger_rate: f64,
    pub avg_volume: f64,
    pub avg_delta: f64,
}

impl OutcomeProfile {
    fn from_records(records: &[&TriggerRecord]) -> Self {
        Self {
            divergent_rate: rate(records, |r| r.is_divergent),
            coherent_rate: rate(records, |r| r.is_coherent()),
            exhaustion_rate: rate(records, |r| r.has_exhaustion),
            high_trigger_rate: rate(records, |r| r.trigger_position == TriggerPosition::High),
            avg_volume: mean(records, |r| r.volume),
            avg_delta: mean(records, |r| r.delta),
        }
    }
}

/// Summary of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Number of triggered bars.
    pub n_trades: usize,
    /// Triggers with a validated reversal.
    pub n_reversals: usize,
    /// Share of triggers with a reversal (%).
    pub winrate: f64,
    /// Mean excursion over reversals.
    pub avg_profit: f64,
    /// Largest excursion over reversals.
    pub max_profit: f64,
    /// Mean excursion length in bars over reversals.
    pub avg_bars: f64,
    /// Total reversal excursion over a fixed loss per non-reversal.
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

    pub winner_profile: OutcomeProfile,
    pub loser_profile: OutcomeProfile,
}

impl ScanSummary {
    /// Summarize a record set, or `None` if it is empty.
    ///
    /// Each trigger without a reversal is charged `fixed_stop_loss` in the
    /// profit factor, which is infinite when every trigger reversed.
    pub fn from_records(records: &[TriggerRecord], fixed_stop_loss: f64) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let all: Vec<&TriggerRecord> = records.iter().collect();
        let (winners, losers): (Vec<&TriggerRecord>, Vec<&TriggerRecord>) =
            all.iter().copied().partition(|r| r.has_reversal);
        let (divergent, non_divergent): (Vec<&TriggerRecord>, Vec<&TriggerRecord>) =
            all.iter().copied().partition(|r| r.is_divergent);

        let n_trades = all.len();
        let winrate = rate(&all, |r| r.has_reversal);
        let avg_profit = mean(&winners, |r| r.max_excursion);
        let max_profit = winners
            .iter()
            .map(|r| r.max_excursion)
            .fold(0.0_f64, f64::max);

        let total_profit: f64 = winners.iter().map(|r| r.max_excursion).sum();
        let total_loss = losers.len() as f64 * fixed_stop_loss;
        let profit_factor = if total_loss > 0.0 {
            total_profit / total_loss
        } else {
            f64::INFINITY
        };

        let divergent_rate = rate(&all, |r| r.is_divergent);
        let coherent_rate = rate(&all, |r| r.is_coherent());
        let exhaustion_rate = rate(&all, |r| r.has_exhaustion);

        let base_score = winrate * avg_profit * (n_trades as f64).ln_1p();
        let quality_bonus = (1.0 + divergent_rate / 100.0)
            * (1.0 + coherent_rate / 100.0)
            * (1.0 + exhaustion_rate / 100.0);

        Some(Self {
            n_trades,
            n_reversals: winners.len(),
            winrate,
            avg_profit,
            max_profit,
            avg_bars: mean(&winners, |r| r.excursion_bars as f64),
            profit_factor,
            final_score: base_score * quality_bonus,

            n_divergent: divergent.len(),
            n_non_divergent: non_divergent.len(),
            winrate_divergent: rate(&divergent, |r| r.has_reversal),
            winrate_non_divergent: rate(&non_divergent, |r| r.has_reversal),

            divergent_rate,
            coherent_rate,
            exhaustion_rate,
            high_trigger_rate: rate(&all, |r| r.trigger_position == TriggerPosition::High),
            low_trigger_rate: rate(&all, |r| r.trigger_position == TriggerPosition::Low),
            both_trigger_rate: rate(&all, |r| r.trigger_position == TriggerPosition::Both),

            winner_profile: OutcomeProfile::from_records(&winners),
            loser_profile: OutcomeProfile::from_records(&losers),
        })
    }
}
