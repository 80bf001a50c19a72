//! Directional backtest of a triggered bar.
//!
//! The test runs as a small state machine:
//!
//! `Pending -> BeforeValidated -> AfterValidated -> Measured`
//!
//! Any validation step may instead move to `Rejected`, which the caller
//! records as "no reversal". A HIGH trigger is traded short from the trigger
//! close, a LOW trigger long; the stop sits `stop_tolerance` beyond the
//! trigger extreme.

use std::fmt;

use trapped_core::config::ReversalConfig;
use trapped_core::{RangeBar, Reversal, StopStatus, TradeDirection, TriggerPosition};
use tracing::trace;

/// Why a trigger produced no trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Position gives no direction (`Both` or `Neutral`).
    AmbiguousPosition(TriggerPosition),
    /// Bar index is past the end of the table.
    IndexOutOfRange,
    /// Fewer trailing bars than required.
    InsufficientData { remaining: usize, required: usize },
    /// Every before-window contains a bar beyond the trigger extreme.
    BeforeWindowBroken,
    /// Every after-window contains a bar through the stop.
    AfterWindowBroken,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AmbiguousPosition(p) => write!(f, "no trade direction for {p} trigger"),
            Rejection::IndexOutOfRange => f.write_str("bar index out of range"),
            Rejection::InsufficientData {
                remaining,
                required,
            } => write!(f, "{remaining} trailing bars, {required} required"),
            Rejection::BeforeWindowBroken => f.write_str("extreme exceeded before trigger"),
            Rejection::AfterWindowBroken => f.write_str("stop breached after trigger"),
        }
    }
}

/// States of one backtest run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BacktestState {
    Pending,
    BeforeValidated {
        before_window: usize,
    },
    AfterValidated {
        before_window: usize,
        after_window: usize,
    },
    Measured(Reversal),
    Rejected(Rejection),
}

impl BacktestState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BacktestState::Measured(_) | BacktestState::Rejected(_))
    }
}

/// Fixed inputs of one run.
#[derive(Debug, Clone, Copy)]
struct TriggerContext {
    idx: usize,
    direction: TradeDirection,
    trigger_high: f64,
    trigger_low: f64,
    trigger_close: f64,
    stop: f64,
}

impl TriggerContext {
    /// Bar makes a new extreme beyond the trigger (before-window rule).
    fn exceeds_extreme(&self, bar: &RangeBar) -> bool {
        match self.direction {
            TradeDirection::Sell => bar.high > self.trigger_high,
            TradeDirection::Buy => bar.low < self.trigger_low,
        }
    }

    /// Bar trades through the stop.
    fn breaches_stop(&self, bar: &RangeBar) -> bool {
        match self.direction {
            TradeDirection::Sell => bar.high > self.stop,
            TradeDirection::Buy => bar.low < self.stop,
        }
    }

    /// Favorable move from the trigger close.
    fn favorable(&self, bar: &RangeBar) -> f64 {
        match self.direction {
            TradeDirection::Sell => self.trigger_close - bar.low,
            TradeDirection::Buy => bar.high - self.trigger_close,
        }
    }
}

/// Directional backtest engine.
#[derive(Debug, Clone)]
pub struct ReversalEngine {
    config: ReversalConfig,
}

impl ReversalEngine {
    /// Create an engine with the given windows and stop tolerance.
    pub fn new(config: ReversalConfig) -> Self {
        Self { config }
    }

    /// Engine configuration.
    pub fn config(&self) -> &ReversalConfig {
        &self.config
    }

    /// Run the backtest for the bar at `idx`.
    pub fn evaluate(
        &self,
        bars: &[RangeBar],
        idx: usize,
        position: TriggerPosition,
    ) -> Result<Reversal, Rejection> {
        let ctx = self.context(bars, idx, position)?;

        let mut state = BacktestState::Pending;
        while !state.is_terminal() {
            state = self.step(state, bars, &ctx);
        }
        trace!(idx, ?state, "backtest finished");

        match state {
            BacktestState::Measured(reversal) => Ok(reversal),
            BacktestState::Rejected(rejection) => Err(rejection),
            // Loop only exits on a terminal state
            _ => Err(Rejection::IndexOutOfRange),
        }
    }

    /// Run the backtest, discarding the rejection reason.
    pub fn run(&self, bars: &[RangeBar], idx: usize, position: TriggerPosition) -> Option<Reversal> {
        self.evaluate(bars, idx, position).ok()
    }

    fn context(
        &self,
        bars: &[RangeBar],
        idx: usize,
        position: TriggerPosition,
    ) -> Result<TriggerContext, Rejection> {
        let direction = match position {
            TriggerPosition::High => TradeDirection::Sell,
            TriggerPosition::Low => TradeDirection::Buy,
            other => return Err(Rejection::AmbiguousPosition(other)),
        };
        let trigger = bars.get(idx).ok_or(Rejection::IndexOutOfRange)?;

        let remaining = bars.len() - idx - 1;
        if remaining < self.config.min_trailing_bars {
            return Err(Rejection::InsufficientData {
                remaining,
                required: self.config.min_trailing_bars,
            });
        }

        let stop = match direction {
            TradeDirection::Sell => trigger.high + self.config.stop_tolerance,
            TradeDirection::Buy => trigger.low - self.config.stop_tolerance,
        };
        Ok(TriggerContext {
            idx,
            direction,
            trigger_high: trigger.high,
            trigger_low: trigger.low,
            trigger_close: trigger.close,
            stop,
        })
    }

    fn step(&self, state: BacktestState, bars: &[RangeBar], ctx: &TriggerContext) -> BacktestState {
        match state {
            BacktestState::Pending => match self.first_before_window(bars, ctx) {
                Some(before_window) => BacktestState::BeforeValidated { before_window },
                None => BacktestState::Rejected(Rejection::BeforeWindowBroken),
            },
            BacktestState::BeforeValidated { before_window } => {
                match self.first_after_window(bars, ctx) {
                    Some(after_window) => BacktestState::AfterValidated {
                        before_window,
                        after_window,
                    },
                    None => BacktestState::Rejected(Rejection::AfterWindowBroken),
                }
            }
            BacktestState::AfterValidated {
                before_window,
                after_window,
            } => {
                let (max_excursion, excursion_bars, stop_status) = measure_excursion(bars, ctx);
                BacktestState::Measured(Reversal {
                    before_window,
                    after_window,
                    max_excursion,
                    excursion_bars,
                    stop_status,
                    trade_direction: ctx.direction,
                })
            }
            terminal => terminal,
        }
    }

    /// First configured window in which no earlier bar exceeds the extreme.
    fn first_before_window(&self, bars: &[RangeBar], ctx: &TriggerContext) -> Option<usize> {
        self.config.validation_windows.iter().copied().find(|&w| {
            ctx.idx >= w && !bars[ctx.idx - w..ctx.idx].iter().any(|b| ctx.exceeds_extreme(b))
        })
    }

    /// First configured window in which no later bar breaches the stop.
    fn first_after_window(&self, bars: &[RangeBar], ctx: &TriggerContext) -> Option<usize> {
        self.config.validation_windows.iter().copied().find(|&w| {
            let end = ctx.idx + 1 + w;
            end <= bars.len() && !bars[ctx.idx + 1..end].iter().any(|b| ctx.breaches_stop(b))
        })
    }
}

impl Default for ReversalEngine {
    fn default() -> Self {
        Self::new(ReversalConfig::default())
    }
}

/// Scan forward from the trigger until the stop is hit or data runs out.
///
/// The running maximum includes the bar that hits the stop.
fn measure_excursion(bars: &[RangeBar], ctx: &TriggerContext) -> (f64, usize, StopStatus) {
    let mut max_excursion = 0.0_f64;
    let mut count = 0;
    for bar in &bars[ctx.idx + 1..] {
        count += 1;
        max_excursion = max_excursion.max(ctx.favorable(bar));
        if ctx.breaches_stop(bar) {
            return (max_excursion, count, StopStatus::Returned);
        }
    }
    (max_excursion, count, StopStatus::EndOfData)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use trapped_core::{DeltaMarks, Direction, LevelMap};

    /// Bar with the given high/low; open/close sit inside the range.
    pub(crate) fn make_bar(i: usize, high: f64, low: f64) -> RangeBar {
        let t = NaiveDate::from_ymd_opt(2025, 3, 12)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + Duration::minutes(i as i64);
        RangeBar {
            open_time: t,
            close_time: t,
            open: low,
            high,
            low,
            close: high,
            volume: 0.0,
            delta: 0.0,
            direction: Direction::Up,
            delta_marks: DeltaMarks::default(),
            levels: LevelMap::new(),
        }
    }

    /// `n` flat bars spanning [99, 101] with a HIGH trigger at `idx`
    /// (high 110, close 108).
    pub(crate) fn make_series(n: usize, idx: usize) -> Vec<RangeBar> {
        let mut bars: Vec<RangeBar> = (0..n).map(|i| make_bar(i, 101.0, 99.0)).collect();
        bars[idx] = make_bar(idx, 110.0, 106.0);
        bars[idx].close = 108.0;
        bars
    }

    #[test]
    fn test_high_trigger_measured_to_end() {
        let bars = make_series(60, 30);
        let engine = ReversalEngine::default();
        let rev = engine.evaluate(&bars, 30, TriggerPosition::High).unwrap();

        assert_eq!(rev.trade_direction, TradeDirection::Sell);
        assert_eq!(rev.before_window, 20);
        assert_eq!(rev.after_window, 20);
        assert_eq!(rev.stop_status, StopStatus::EndOfData);
        assert_eq!(rev.excursion_bars, 29);
        // 108 - 99
        assert!((rev.max_excursion - 9.0).abs() < 1e-10);
    }

    #[test]
    fn test_before_window_fallback() {
        let mut bars = make_series(60, 30);
        // New high 12 bars before the trigger breaks the 20 window only
        bars[18].high = 111.0;
        let rev = ReversalEngine::default()
            .evaluate(&bars, 30, TriggerPosition::High)
            .unwrap();
        assert_eq!(rev.before_window, 10);

        // Right before the trigger every window fails
        bars[29].high = 111.0;
        assert_eq!(
            ReversalEngine::default().evaluate(&bars, 30, TriggerPosition::High),
            Err(Rejection::BeforeWindowBroken)
        );
    }

    #[test]
    fn test_after_window_and_stop() {
        let mut bars = make_series(60, 30);
        // Breach at trigger + 8: the 20 and 10 windows fail, 5 holds
        bars[38].high = 110.75;
        let rev = ReversalEngine::default()
            .evaluate(&bars, 30, TriggerPosition::High)
            .unwrap();
        assert_eq!(rev.after_window, 5);
        assert_eq!(rev.stop_status, StopStatus::Returned);
        assert_eq!(rev.excursion_bars, 8);

        // Touching the stop exactly is not a breach
        let mut bars = make_series(60, 30);
        bars[31].high = 110.5;
        let rev = ReversalEngine::default()
            .evaluate(&bars, 30, TriggerPosition::High)
            .unwrap();
        assert_eq!(rev.stop_status, StopStatus::EndOfData);

        bars[32].high = 110.6;
        assert_eq!(
            ReversalEngine::default().evaluate(&bars, 30, TriggerPosition::High),
            Err(Rejection::AfterWindowBroken)
        );
    }

    #[test]
    fn test_low_trigger() {
        let mut bars: Vec<RangeBar> = (0..60).map(|i| make_bar(i, 101.0, 99.0)).collect();
        bars[30] = make_bar(30, 94.0, 90.0);
        bars[30].close = 92.0;
        let rev = ReversalEngine::default()
            .evaluate(&bars, 30, TriggerPosition::Low)
            .unwrap();
        assert_eq!(rev.trade_direction, TradeDirection::Buy);
        // 101 - 92
        assert!((rev.max_excursion - 9.0).abs() < 1e-10);
    }

    #[test]
    fn test_rejections() {
        let bars = make_series(60, 30);
        let engine = ReversalEngine::default();

        assert_eq!(
            engine.evaluate(&bars, 30, TriggerPosition::Both),
            Err(Rejection::AmbiguousPosition(TriggerPosition::Both))
        );
        assert!(engine.run(&bars, 30, TriggerPosition::Neutral).is_none());
        assert_eq!(
            engine.evaluate(&bars, 40, TriggerPosition::High),
            Err(Rejection::InsufficientData {
                remaining: 19,
                required: 25
            })
        );
        assert_eq!(
            engine.evaluate(&bars, 60, TriggerPosition::High),
            Err(Rejection::IndexOutOfRange)
        );
    }

    #[test]
    fn test_early_trigger_uses_small_window() {
        // Only 7 bars precede the trigger: 20 and 10 are unavailable
        let bars = make_series(40, 7);
        let rev = ReversalEngine::default()
            .evaluate(&bars, 7, TriggerPosition::High)
            .unwrap();
        assert_eq!(rev.before_window, 5);

        let bars = make_series(40, 3);
        assert_eq!(
            ReversalEngine::default().evaluate(&bars, 3, TriggerPosition::High),
            Err(Rejection::BeforeWindowBroken)
        );
    }

    #[test]
    fn test_state_transitions() {
        let bars = make_series(60, 30);
        let engine = ReversalEngine::default();
        let ctx = engine.context(&bars, 30, TriggerPosition::High).unwrap();

        let s1 = engine.step(BacktestState::Pending, &bars, &ctx);
        assert_eq!(s1, BacktestState::BeforeValidated { before_window: 20 });
        let s2 = engine.step(s1, &bars, &ctx);
        assert!(matches!(s2, BacktestState::AfterValidated { after_window: 20, .. }));
        let s3 = engine.step(s2, &bars, &ctx);
        assert!(s3.is_terminal());
        assert_eq!(engine.step(s3, &bars, &ctx), s3);
    }
}
