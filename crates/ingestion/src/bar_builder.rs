//! Range bar building from classified ticks.
//!
//! A bar stays open until a tick trades a full `range_size` away from its
//! open. The bar then closes at exactly `open ± range_size`, and the next bar
//! is anchored at that close. When a single tick jumps more than one range,
//! zero-volume phantom bars fill the gap so that consecutive bars stay
//! contiguous.

use ordered_float::OrderedFloat;
use trapped_core::{
    DeltaMarks, Direction, Error, LevelMap, RangeBar, Result, Tick, Timestamp, TradeSide,
};
use tracing::{debug, trace};

use crate::classifier::{ClassificationStats, TickClassifier};

/// Slack applied to threshold comparisons so that prices sitting exactly on a
/// boundary are not missed through float rounding.
const PRICE_EPSILON: f64 = 1e-9;

/// Running signed volume over the whole tick stream.
///
/// The value is never reset between bars. It is passed in and returned
/// explicitly so that a caller can resume a stream from a known state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeltaAccumulator {
    value: f64,
}

impl DeltaAccumulator {
    /// Start from a known value.
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    /// Current value.
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Value after adding one signed print.
    #[inline]
    #[must_use]
    pub fn apply(self, signed_volume: f64) -> Self {
        Self {
            value: self.value + signed_volume,
        }
    }
}

/// A bar that's currently being built.
#[derive(Debug, Clone)]
struct BarInProgress {
    open_time: Timestamp,
    close_time: Timestamp,
    open: f64,
    high: f64,
    low: f64,
    last_price: f64,
    volume: f64,
    marks: DeltaMarks,
    levels: LevelMap,
}

impl BarInProgress {
    fn new(open: f64, time: Timestamp, delta: DeltaAccumulator) -> Self {
        Self {
            open_time: time,
            close_time: time,
            open,
            high: open,
            low: open,
            last_price: open,
            volume: 0.0,
            marks: DeltaMarks::flat(delta.value()),
            levels: LevelMap::new(),
        }
    }

    fn add_tick(&mut self, tick: &Tick, side: TradeSide, delta: DeltaAccumulator) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.last_price = tick.price;
        self.close_time = tick.time;
        self.volume += tick.volume;

        let d = delta.value();
        self.marks.high = self.marks.high.max(d);
        self.marks.low = self.marks.low.min(d);
        self.marks.close = d;

        self.levels
            .entry(OrderedFloat(tick.price))
            .or_default()
            .record(side, tick.volume);
    }

    /// Close the bar at `close`. Threshold closes cap the extreme at the
    /// close price.
    fn close_at(mut self, close: f64, direction: Direction) -> RangeBar {
        match direction {
            Direction::Up => self.high = close,
            Direction::Down => self.low = close,
            Direction::Flat => {}
        }
        let delta = self.levels.values().map(|l| l.delta()).sum();

        RangeBar {
            open_time: self.open_time,
            close_time: self.close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close,
            volume: self.volume,
            delta,
            direction,
            delta_marks: self.marks,
            levels: self.levels,
        }
    }
}

/// Zero-volume bar spanning `[open, close]` at a single instant.
fn phantom_bar(open: f64, close: f64, time: Timestamp, delta: DeltaAccumulator) -> RangeBar {
    RangeBar {
        open_time: time,
        close_time: time,
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 0.0,
        delta: 0.0,
        direction: Direction::from_prices(open, close),
        delta_marks: DeltaMarks::flat(delta.value()),
        levels: LevelMap::new(),
    }
}

/// Streaming range bar builder.
#[derive(Debug, Clone)]
pub struct RangeBarBuilder {
    range_size: f64,
    delta: DeltaAccumulator,
    classifier: TickClassifier,
    current: Option<BarInProgress>,
    /// Open price for the next bar, set after a threshold close.
    next_open: Option<f64>,
    bars_closed: usize,
    phantom_bars: usize,
    skipped_ticks: usize,
}

impl RangeBarBuilder {
    /// Create a builder with a zero running delta.
    pub fn new(range_size: f64) -> Result<Self> {
        Self::with_delta(range_size, DeltaAccumulator::default())
    }

    /// Create a builder that resumes from a known running delta.
    pub fn with_delta(range_size: f64, delta: DeltaAccumulator) -> Result<Self> {
        if !range_size.is_finite() || range_size <= 0.0 {
            return Err(Error::config(format!(
                "range size must be positive, got {range_size}"
            )));
        }
        Ok(Self {
            range_size,
            delta,
            classifier: TickClassifier::new(),
            current: None,
            next_open: None,
            bars_closed: 0,
            phantom_bars: 0,
            skipped_ticks: 0,
        })
    }

    /// Range size in price units.
    pub fn range_size(&self) -> f64 {
        self.range_size
    }

    /// Running delta after the last consumed tick.
    pub fn delta(&self) -> DeltaAccumulator {
        self.delta
    }

    /// Tick classification statistics.
    pub fn classification_stats(&self) -> &ClassificationStats {
        self.classifier.stats()
    }

    /// Bars closed by a threshold breach so far (phantoms excluded).
    pub fn bars_closed(&self) -> usize {
        self.bars_closed
    }

    /// Phantom bars emitted so far.
    pub fn phantom_bars(&self) -> usize {
        self.phantom_bars
    }

    /// Ticks ignored because a field was not finite.
    pub fn skipped_ticks(&self) -> usize {
        self.skipped_ticks
    }

    /// Whether a bar has received ticks and is waiting for a close.
    pub fn has_open_bar(&self) -> bool {
        self.current.is_some()
    }

    /// Consume one tick and return any bars it completed.
    ///
    /// Returns nothing, one closed bar, or one closed bar followed by the
    /// phantom bars needed to reach the tick's price.
    pub fn push(&mut self, tick: &Tick) -> Vec<RangeBar> {
        if !tick.is_valid() {
            self.skipped_ticks += 1;
            trace!(?tick, "skipping invalid tick");
            return Vec::new();
        }

        let side = self.classifier.classify(tick);
        let delta_before = self.delta;
        self.delta = self.delta.apply(tick.volume * side.sign_f64());

        let open = self.next_open.unwrap_or(tick.price);
        let bar = self
            .current
            .get_or_insert_with(|| BarInProgress::new(open, tick.time, delta_before));
        bar.add_tick(tick, side, self.delta);

        let upper = bar.open + self.range_size;
        let lower = bar.open - self.range_size;
        let (close, direction) = if tick.price >= upper - PRICE_EPSILON {
            (upper, Direction::Up)
        } else if tick.price <= lower + PRICE_EPSILON {
            (lower, Direction::Down)
        } else {
            return Vec::new();
        };

        let mut completed = Vec::with_capacity(1);
        if let Some(bar) = self.current.take() {
            completed.push(bar.close_at(close, direction));
            self.bars_closed += 1;
        }

        // Bridge any remaining gap to the tick price
        let step = self.range_size * direction.sign() as f64;
        let mut anchor = close;
        loop {
            let beyond = match direction {
                Direction::Up => tick.price >= anchor + self.range_size - PRICE_EPSILON,
                Direction::Down => tick.price <= anchor - self.range_size + PRICE_EPSILON,
                Direction::Flat => false,
            };
            if !beyond {
                break;
            }
            completed.push(phantom_bar(anchor, anchor + step, tick.time, self.delta));
            self.phantom_bars += 1;
            anchor += step;
        }
        if completed.len() > 1 {
            debug!(
                time = %tick.time,
                price = tick.price,
                phantoms = completed.len() - 1,
                "gap bridged with phantom bars"
            );
        }

        self.next_open = Some(anchor);
        completed
    }

    /// Consume a batch of ticks, collecting every completed bar.
    pub fn push_all<'a>(&mut self, ticks: impl IntoIterator<Item = &'a Tick>) -> Vec<RangeBar> {
        let mut bars = Vec::new();
        for tick in ticks {
            bars.extend(self.push(tick));
        }
        bars
    }

    /// Flush the open bar, truncated at the last traded price.
    ///
    /// Returns `None` if no tick arrived since the last threshold close.
    pub fn finish(&mut self) -> Option<RangeBar> {
        let bar = self.current.take()?;
        let close = bar.last_price;
        let direction = Direction::from_prices(bar.open, close);
        Some(bar.close_at(close, direction))
    }

    /// Reset to an empty state with the given running delta.
    pub fn clear(&mut self, delta: DeltaAccumulator) {
        self.delta = delta;
        self.classifier.reset_stats();
        self.current = None;
        self.next_open = None;
        self.bars_closed = 0;
        self.phantom_bars = 0;
        self.skipped_ticks = 0;
    }
}

/// Build range bars from a complete tick sequence, flushing the last bar.
pub fn build_range_bars(ticks: &[Tick], range_size: f64) -> Result<Vec<RangeBar>> {
    let mut builder = RangeBarBuilder::new(range_size)?;
    let mut bars = builder.push_all(ticks);
    bars.extend(builder.finish());

    let stats = builder.classification_stats();
    debug!(
        ticks = ticks.len(),
        bars = bars.len(),
        phantoms = builder.phantom_bars(),
        skipped = builder.skipped_ticks(),
        ambiguous_frac = stats.ambiguous_frac(),
        "range bars built"
    );
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn make_tick(sec: u32, price: f64, volume: f64) -> Tick {
        // Quote sits one tick below the trade so it classifies as a buy
        Tick {
            time: NaiveDate::from_ymd_opt(2025, 3, 12)
                .unwrap()
                .and_hms_opt(9, 30, sec)
                .unwrap(),
            price,
            bid: price - 0.5,
            ask: price,
            volume,
        }
    }

    fn make_sell(sec: u32, price: f64, volume: f64) -> Tick {
        Tick {
            bid: price,
            ask: price + 0.5,
            ..make_tick(sec, price, volume)
        }
    }

    #[test]
    fn test_three_tick_stream() {
        let ticks = vec![
            make_tick(0, 10.0, 1.0),
            make_tick(1, 12.0, 1.0),
            make_tick(2, 14.0, 1.0),
        ];
        let bars = build_range_bars(&ticks, 2.0).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!((bars[0].open, bars[0].close), (10.0, 12.0));
        assert_eq!((bars[1].open, bars[1].close), (12.0, 14.0));
        for bar in &bars {
            assert_eq!(bar.direction, Direction::Up);
            assert!(bar.levels.values().all(|l| l.bid_volume == 0.0));
        }
    }

    #[test]
    fn test_close_is_capped_at_range() {
        let ticks = vec![make_tick(0, 100.0, 1.0), make_sell(1, 97.5, 2.0)];
        let bars = build_range_bars(&ticks, 2.0).unwrap();

        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.close, 98.0);
        assert_eq!(bar.low, 98.0);
        assert_eq!(bar.high, 100.0);
        assert_eq!(bar.direction, Direction::Down);
        // The breaching print stays at its own level
        assert!(bar.levels.contains_key(&OrderedFloat(97.5)));
        assert_eq!(bar.volume, 3.0);
        assert_eq!(bar.delta, -1.0);
    }

    #[test]
    fn test_gap_emits_phantoms() {
        let ticks = vec![make_tick(0, 10.0, 1.0), make_tick(5, 16.5, 4.0)];
        let mut builder = RangeBarBuilder::new(2.0).unwrap();
        let bars = builder.push_all(&ticks);

        assert_eq!(bars.len(), 3);
        assert_eq!((bars[0].open, bars[0].close), (10.0, 12.0));
        assert!(!bars[0].is_phantom());

        for (bar, (open, close)) in bars[1..].iter().zip([(12.0, 14.0), (14.0, 16.0)]) {
            assert!(bar.is_phantom());
            assert_eq!((bar.open, bar.close), (open, close));
            assert_eq!(bar.open_time, ticks[1].time);
            assert_eq!(bar.close_time, ticks[1].time);
            assert_eq!(bar.delta_marks, DeltaMarks::flat(5.0));
        }
        assert_eq!(builder.phantom_bars(), 2);
        assert_eq!(builder.bars_closed(), 1);

        // Next bar is anchored at the last phantom close
        let more = builder.push(&make_tick(6, 18.0, 1.0));
        assert_eq!(more.len(), 1);
        assert_eq!((more[0].open, more[0].close), (16.0, 18.0));
    }

    #[test]
    fn test_running_delta_not_reset() {
        let ticks = vec![
            make_tick(0, 10.0, 3.0),
            make_tick(1, 12.0, 1.0),
            make_sell(2, 11.0, 2.0),
        ];
        let mut builder = RangeBarBuilder::new(2.0).unwrap();
        let bars = builder.push_all(&ticks);
        let last = builder.finish().unwrap();

        assert_eq!(bars[0].delta_marks.open, 0.0);
        assert_eq!(bars[0].delta_marks.close, 4.0);
        assert_eq!(last.delta_marks.open, 4.0);
        assert_eq!(last.delta_marks.close, 2.0);
        assert_eq!(last.delta_marks.low, 2.0);
        assert_eq!(builder.delta().value(), 2.0);
    }

    #[test]
    fn test_final_bar_truncated() {
        let ticks = vec![make_tick(0, 10.0, 1.0), make_tick(1, 11.0, 1.0)];
        let bars = build_range_bars(&ticks, 2.0).unwrap();

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 11.0);
        assert_eq!(bars[0].direction, Direction::Up);

        let flat = build_range_bars(&[make_tick(0, 10.0, 1.0)], 2.0).unwrap();
        assert_eq!(flat[0].direction, Direction::Flat);
    }

    #[test]
    fn test_no_flush_after_threshold_close() {
        let ticks = vec![make_tick(0, 10.0, 1.0), make_tick(1, 12.0, 1.0)];
        let mut builder = RangeBarBuilder::new(2.0).unwrap();
        assert_eq!(builder.push_all(&ticks).len(), 1);
        assert!(!builder.has_open_bar());
        assert!(builder.finish().is_none());
    }

    #[test]
    fn test_mid_quote_print_only_counts_volume() {
        let mut tick = make_tick(0, 10.0, 2.0);
        tick.bid = 9.75;
        tick.ask = 10.25;
        let bars = build_range_bars(&[tick], 2.0).unwrap();
        let level = bars[0].levels[&OrderedFloat(10.0)];
        assert_eq!(level.volume, 2.0);
        assert_eq!(level.bid_volume + level.ask_volume, 0.0);
    }

    #[test]
    fn test_invalid_tick_skipped() {
        let mut builder = RangeBarBuilder::new(2.0).unwrap();
        builder.push(&make_tick(0, f64::NAN, 1.0));
        assert_eq!(builder.skipped_ticks(), 1);
        assert!(!builder.has_open_bar());
    }

    #[test]
    fn test_rejects_bad_range() {
        assert!(RangeBarBuilder::new(0.0).is_err());
        assert!(RangeBarBuilder::new(f64::NAN).is_err());
    }
}
