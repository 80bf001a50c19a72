//! Core data types for the trapped-orders pipeline.

use chrono::{NaiveDateTime, NaiveTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Exchange timestamp (naive, exchange-local).
pub type Timestamp = NaiveDateTime;

/// Price type with ordering support.
pub type Price = OrderedFloat<f64>;

/// Size/quantity type.
pub type Size = f64;

/// Per-price breakdown of a bar, ascending by price.
pub type LevelMap = BTreeMap<Price, PriceLevelStats>;

/// Adjacent-level ratios tested by the imbalance extractor.
pub const IMBALANCE_RATIOS: [f64; 4] = [2.0, 3.0, 4.0, 5.0];

/// A single trade print with the prevailing best bid/ask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Trade time.
    pub time: Timestamp,
    /// Trade price.
    pub price: f64,
    /// Best bid at the time of the trade.
    pub bid: f64,
    /// Best ask at the time of the trade.
    pub ask: f64,
    /// Trade size.
    pub volume: Size,
}

impl Tick {
    /// Infer the aggressor side from the resting quote.
    ///
    /// The ask test runs first, so a crossed quote classifies as a buy.
    #[inline]
    pub fn side(&self) -> TradeSide {
        if self.price >= self.ask {
            TradeSide::Buy
        } else if self.price <= self.bid {
            TradeSide::Sell
        } else {
            TradeSide::Ambiguous
        }
    }

    /// Signed size: positive for buys, negative for sells, zero at mid.
    #[inline]
    pub fn signed_volume(&self) -> f64 {
        self.volume * self.side().sign_f64()
    }

    /// All numeric fields finite and volume non-negative.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite()
            && self.bid.is_finite()
            && self.ask.is_finite()
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

/// Inferred trade side from bid/ask alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum TradeSide {
    /// Trade at or above ask (buyer-initiated).
    Buy = 1,
    /// Trade at or below bid (seller-initiated).
    Sell = -1,
    /// Trade between bid and ask.
    Ambiguous = 0,
}

impl TradeSide {
    /// Get the sign as i8.
    #[inline]
    pub fn sign(self) -> i8 {
        self as i8
    }

    /// Get the sign as f64.
    #[inline]
    pub fn sign_f64(self) -> f64 {
        self.sign() as f64
    }
}

/// Volume traded at one price inside one bar.
///
/// `bid_volume` and `ask_volume` are disjoint per tick; mid-quote prints only
/// count towards `volume`, so `volume >= bid_volume + ask_volume`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceLevelStats {
    /// Total traded size at this price.
    #[serde(default)]
    pub volume: Size,
    /// Sell-initiated size (trade at or below bid).
    #[serde(default)]
    pub bid_volume: Size,
    /// Buy-initiated size (trade at or above ask).
    #[serde(default)]
    pub ask_volume: Size,
}

impl PriceLevelStats {
    /// Create level stats from explicit values.
    pub fn new(volume: Size, bid_volume: Size, ask_volume: Size) -> Self {
        Self {
            volume,
            bid_volume,
            ask_volume,
        }
    }

    /// Record one print at this level.
    #[inline]
    pub fn record(&mut self, side: TradeSide, size: Size) {
        self.volume += size;
        match side {
            TradeSide::Buy => self.ask_volume += size,
            TradeSide::Sell => self.bid_volume += size,
            TradeSide::Ambiguous => {}
        }
    }

    /// Add another level's totals into this one.
    #[inline]
    pub fn merge(&mut self, other: &PriceLevelStats) {
        self.volume += other.volume;
        self.bid_volume += other.bid_volume;
        self.ask_volume += other.ask_volume;
    }

    /// Level delta: ask volume minus bid volume.
    #[inline]
    pub fn delta(&self) -> f64 {
        self.ask_volume - self.bid_volume
    }
}

/// Close direction of a range bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Direction {
    /// Close above open.
    Up,
    /// Close below open.
    Down,
    /// Close equal to open (only the final, truncated bar).
    Flat,
}

impl Direction {
    /// Direction implied by an open/close pair.
    pub fn from_prices(open: f64, close: f64) -> Self {
        if close > open {
            Direction::Up
        } else if close < open {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    /// Sign as i8 (+1, -1, 0).
    #[inline]
    pub fn sign(self) -> i8 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
            Direction::Flat => 0,
        }
    }
}

impl From<Direction> for i8 {
    fn from(d: Direction) -> Self {
        d.sign()
    }
}

impl TryFrom<i8> for Direction {
    type Error = Error;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Direction::Up),
            -1 => Ok(Direction::Down),
            0 => Ok(Direction::Flat),
            other => Err(Error::parse(format!("invalid bar direction {other}"))),
        }
    }
}

/// Running stream delta sampled at the bar's open/high/low/close.
///
/// The running delta is never reset between bars, so these values are only
/// comparable within one aggregation run. Classification uses
/// [`RangeBar::delta`] instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaMarks {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl DeltaMarks {
    /// All four marks at the same value (bar open, phantom bars).
    pub fn flat(value: f64) -> Self {
        Self {
            open: value,
            high: value,
            low: value,
            close: value,
        }
    }
}

/// Fixed-range OHLC bar with per-price order-flow breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBar {
    /// Time of the first tick in the bar.
    pub open_time: Timestamp,
    /// Time of the tick that closed the bar.
    pub close_time: Timestamp,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Total volume.
    pub volume: Size,
    /// Bar delta (sum of ask volume minus sum of bid volume).
    pub delta: f64,
    /// Close direction.
    pub direction: Direction,
    /// Running stream delta marks (legacy).
    pub delta_marks: DeltaMarks,
    /// Volume breakdown by price.
    pub levels: LevelMap,
}

impl RangeBar {
    /// Zero-volume bar synthesized to bridge a price gap.
    pub fn is_phantom(&self) -> bool {
        self.volume == 0.0 && self.levels.is_empty() && self.open_time == self.close_time
    }

    /// Sum of level volumes.
    pub fn level_volume(&self) -> Size {
        self.levels.values().map(|l| l.volume).sum()
    }

    /// Sum of level ask volumes.
    pub fn total_ask(&self) -> Size {
        self.levels.values().map(|l| l.ask_volume).sum()
    }

    /// Sum of level bid volumes.
    pub fn total_bid(&self) -> Size {
        self.levels.values().map(|l| l.bid_volume).sum()
    }

    /// Delta recomputed from the levels.
    pub fn level_delta(&self) -> f64 {
        self.total_ask() - self.total_bid()
    }

    /// High minus low.
    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Where the trigger conditions hold inside the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerPosition {
    /// Concentration and ask aggression at the top levels.
    High,
    /// Concentration and bid aggression at the bottom levels.
    Low,
    /// Both sides hold.
    Both,
    /// Neither side holds on its own.
    Neutral,
}

impl TriggerPosition {
    /// Uppercase label used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerPosition::High => "HIGH",
            TriggerPosition::Low => "LOW",
            TriggerPosition::Both => "BOTH",
            TriggerPosition::Neutral => "NEUTRAL",
        }
    }

    /// Whether the top zone is implied.
    pub fn covers_high(self) -> bool {
        matches!(self, TriggerPosition::High | TriggerPosition::Both)
    }

    /// Whether the bottom zone is implied.
    pub fn covers_low(self) -> bool {
        matches!(self, TriggerPosition::Low | TriggerPosition::Both)
    }
}

impl fmt::Display for TriggerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adjacent-level imbalance counts per tested ratio (see [`IMBALANCE_RATIOS`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImbalanceCounts {
    /// Buy imbalances in the top zone (ask at level vs bid one level below).
    pub high: [u32; 4],
    /// Sell imbalances in the bottom zone (bid at level vs ask one level above).
    pub low: [u32; 4],
}

impl ImbalanceCounts {
    /// Total top-zone count across all ratios.
    pub fn high_total(&self) -> u32 {
        self.high.iter().sum()
    }

    /// Total bottom-zone count across all ratios.
    pub fn low_total(&self) -> u32 {
        self.low.iter().sum()
    }

    /// Any imbalance at all.
    pub fn any(&self) -> bool {
        self.high_total() + self.low_total() > 0
    }
}

/// Imbalance agreement with the trigger zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImbalanceCoherence {
    Coherent,
    Weak,
    Incoherent,
    /// No zone implied (neutral trigger).
    None,
}

impl ImbalanceCoherence {
    pub fn as_str(self) -> &'static str {
        match self {
            ImbalanceCoherence::Coherent => "COHERENT",
            ImbalanceCoherence::Weak => "WEAK",
            ImbalanceCoherence::Incoherent => "INCOHERENT",
            ImbalanceCoherence::None => "NONE",
        }
    }
}

impl fmt::Display for ImbalanceCoherence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side ran out of aggressive volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExhaustionType {
    None,
    /// Ask volume collapse in the top zone.
    AskHigh,
    /// Bid volume collapse in the bottom zone.
    BidLow,
}

impl ExhaustionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExhaustionType::None => "NONE",
            ExhaustionType::AskHigh => "ASK_HIGH",
            ExhaustionType::BidLow => "BID_LOW",
        }
    }
}

impl fmt::Display for ExhaustionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First adjacent-level collapse found in a zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exhaustion {
    pub has_exhaustion: bool,
    pub kind: ExhaustionType,
    /// Inner volume divided by outer volume for the matching pair.
    pub ratio: f64,
    /// (outer price, inner price) of the matching pair.
    pub levels: Option<(f64, f64)>,
}

impl Exhaustion {
    /// No exhaustion found.
    pub fn none() -> Self {
        Self {
            has_exhaustion: false,
            kind: ExhaustionType::None,
            ratio: 0.0,
            levels: None,
        }
    }
}

/// How the excursion scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopStatus {
    /// Price came back through the stop level.
    Returned,
    /// Data ran out before the stop was hit.
    EndOfData,
}

impl StopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StopStatus::Returned => "RETURNED",
            StopStatus::EndOfData => "END_OF_DATA",
        }
    }
}

impl fmt::Display for StopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the simulated trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a validated directional backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reversal {
    /// Before-window that validated the extreme.
    pub before_window: usize,
    /// After-window that held the stop.
    pub after_window: usize,
    /// Largest favorable move from the trigger close.
    pub max_excursion: f64,
    /// Bars scanned until the stop or end of data.
    pub excursion_bars: usize,
    pub stop_status: StopStatus,
    pub trade_direction: TradeDirection,
}

/// Classification of one triggered bar under one parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResult {
    /// Position of the bar in the bar table.
    pub bar_index: usize,
    pub trigger_position: TriggerPosition,
    pub is_divergent: bool,
    pub imbalances: ImbalanceCounts,
    pub imbalance_coherence: ImbalanceCoherence,
    pub exhaustion: Exhaustion,
    pub reversal: Option<Reversal>,
}

impl TriggerResult {
    /// Whether the backtest produced a validated trade.
    pub fn has_reversal(&self) -> bool {
        self.reversal.is_some()
    }
}

/// Time-of-day filter applied to bar open times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TimeSlot {
    /// Every bar.
    All,
    /// Inclusive `[start, end]` window.
    Window { start: NaiveTime, end: NaiveTime },
}

impl TimeSlot {
    /// Whether a timestamp's time of day falls inside the slot.
    pub fn contains(&self, ts: &Timestamp) -> bool {
        match self {
            TimeSlot::All => true,
            TimeSlot::Window { start, end } => {
                let t = ts.time();
                *start <= t && t <= *end
            }
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSlot::All => f.write_str("ALL"),
            TimeSlot::Window { start, end } => {
                write!(f, "{}-{}", start.format("%H:%M"), end.format("%H:%M"))
            }
        }
    }
}

impl FromStr for TimeSlot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(TimeSlot::All);
        }
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| Error::parse(format!("time slot '{s}' is not HH:MM-HH:MM")))?;
        let parse = |part: &str| {
            NaiveTime::parse_from_str(part.trim(), "%H:%M")
                .map_err(|e| Error::parse(format!("time slot '{s}': {e}")))
        };
        let (start, end) = (parse(start)?, parse(end)?);
        if start > end {
            return Err(Error::parse(format!("time slot '{s}' ends before it starts")));
        }
        Ok(TimeSlot::Window { start, end })
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.to_string()
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 3, 12)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn tick(price: f64, bid: f64, ask: f64) -> Tick {
        Tick {
            time: ts(9, 30),
            price,
            bid,
            ask,
            volume: 2.0,
        }
    }

    #[test]
    fn test_tick_side() {
        assert_eq!(tick(100.25, 100.0, 100.25).side(), TradeSide::Buy);
        assert_eq!(tick(100.0, 100.0, 100.25).side(), TradeSide::Sell);
        assert_eq!(tick(100.1, 100.0, 100.25).side(), TradeSide::Ambiguous);
        // Crossed quote: ask test wins
        assert_eq!(tick(100.0, 100.0, 100.0).side(), TradeSide::Buy);
        assert_eq!(tick(100.0, 100.0, 100.25).signed_volume(), -2.0);
    }

    #[test]
    fn test_level_record_and_delta() {
        let mut level = PriceLevelStats::default();
        level.record(TradeSide::Buy, 3.0);
        level.record(TradeSide::Sell, 1.0);
        level.record(TradeSide::Ambiguous, 2.0);

        assert_eq!(level.volume, 6.0);
        assert_eq!(level.ask_volume, 3.0);
        assert_eq!(level.bid_volume, 1.0);
        assert_eq!(level.delta(), 2.0);
    }

    #[test]
    fn test_direction_conversions() {
        assert_eq!(Direction::from_prices(10.0, 12.0), Direction::Up);
        assert_eq!(Direction::from_prices(10.0, 8.0), Direction::Down);
        assert_eq!(Direction::from_prices(10.0, 10.0), Direction::Flat);
        assert_eq!(Direction::try_from(-1i8).unwrap(), Direction::Down);
        assert!(Direction::try_from(2i8).is_err());
        assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "1");
    }

    #[test]
    fn test_labels_serialize_uppercase() {
        assert_eq!(serde_json::to_string(&TriggerPosition::Both).unwrap(), "\"BOTH\"");
        assert_eq!(
            serde_json::to_string(&ExhaustionType::AskHigh).unwrap(),
            "\"ASK_HIGH\""
        );
        assert_eq!(StopStatus::EndOfData.to_string(), "END_OF_DATA");
    }

    #[test]
    fn test_time_slot_parse_and_contains() {
        let slot: TimeSlot = "09:00-15:30".parse().unwrap();
        assert!(slot.contains(&ts(9, 0)));
        assert!(slot.contains(&ts(15, 30)));
        assert!(!slot.contains(&ts(15, 31)));
        assert_eq!(slot.to_string(), "09:00-15:30");

        assert_eq!("all".parse::<TimeSlot>().unwrap(), TimeSlot::All);
        assert!("15:30-09:00".parse::<TimeSlot>().is_err());
        assert!("nine-ten".parse::<TimeSlot>().is_err());
    }

    #[test]
    fn test_imbalance_totals() {
        let counts = ImbalanceCounts {
            high: [2, 1, 0, 0],
            low: [0; 4],
        };
        assert_eq!(counts.high_total(), 3);
        assert_eq!(counts.low_total(), 0);
        assert!(counts.any());
        assert!(!ImbalanceCounts::default().any());
    }
}
