//! Flat-file tables of range bars.
//!
//! Two row shapes exist. Raw rows come straight from the aggregator and keep
//! the running delta marks. Cleaned rows carry the canonical bar delta and
//! a level map with unique, sorted price keys.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use trapped_core::{DeltaMarks, Direction, Error, PriceLevelStats, RangeBar, Result, Timestamp};
use tracing::{info, warn};

use crate::price_stats::{decode_level_entries, decode_levels_lossy, encode_levels, encode_raw_levels};
use crate::timefmt::serde_bar_time;

/// One row of a raw bar table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBarRecord {
    #[serde(with = "serde_bar_time")]
    pub open_time: Timestamp,
    #[serde(with = "serde_bar_time")]
    pub close_time: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub delta_open: f64,
    pub delta_high: f64,
    pub delta_low: f64,
    pub delta_close: f64,
    pub direction: Direction,
    /// Serialized level map, possibly with duplicate keys.
    pub price_stats: String,
}

impl RawBarRecord {
    /// Serialize a freshly aggregated bar.
    pub fn from_bar(bar: &RangeBar) -> Result<Self> {
        Ok(Self {
            open_time: bar.open_time,
            close_time: bar.close_time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            delta_open: bar.delta_marks.open,
            delta_high: bar.delta_marks.high,
            delta_low: bar.delta_marks.low,
            delta_close: bar.delta_marks.close,
            direction: bar.direction,
            price_stats: encode_raw_levels(&bar.levels)?,
        })
    }

    /// Decoded level entries in stored order, duplicates included.
    pub fn level_entries(&self) -> Result<Vec<(f64, PriceLevelStats)>> {
        decode_level_entries(&self.price_stats)
    }

    /// Running delta marks.
    pub fn delta_marks(&self) -> DeltaMarks {
        DeltaMarks {
            open: self.delta_open,
            high: self.delta_high,
            low: self.delta_low,
            close: self.delta_close,
        }
    }
}

/// One row of a cleaned bar table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanBarRecord {
    #[serde(with = "serde_bar_time")]
    pub open_time: Timestamp,
    #[serde(with = "serde_bar_time")]
    pub close_time: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Absent in raw tables; recomputed from the levels when missing.
    #[serde(default)]
    pub delta: Option<f64>,
    pub direction: Direction,
    pub price_stats: String,
}

impl CleanBarRecord {
    /// Serialize a bar in canonical form.
    pub fn from_bar(bar: &RangeBar) -> Result<Self> {
        Ok(Self {
            open_time: bar.open_time,
            close_time: bar.close_time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            delta: Some(bar.delta),
            direction: bar.direction,
            price_stats: encode_levels(&bar.levels)?,
        })
    }

    /// Rebuild the bar. An unreadable level map becomes an empty one.
    pub fn into_bar(self) -> RangeBar {
        let levels = decode_levels_lossy(&self.price_stats);
        let delta = self
            .delta
            .unwrap_or_else(|| levels.values().map(|l| l.delta()).sum());
        RangeBar {
            open_time: self.open_time,
            close_time: self.close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            delta,
            direction: self.direction,
            delta_marks: DeltaMarks::default(),
            levels,
        }
    }
}

fn open_input(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(Error::missing_input(path.display().to_string()));
    }
    Ok(File::open(path)?)
}

fn csv_error(context: &str, e: csv::Error) -> Error {
    Error::data(format!("{context}: {e}"))
}

// ============================================================================
// Raw tables
// ============================================================================

/// Write raw rows for the given bars.
pub fn write_raw_bars_to<W: Write>(writer: W, bars: &[RangeBar]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for bar in bars {
        wtr.serialize(RawBarRecord::from_bar(bar)?)
            .map_err(|e| csv_error("writing raw bar", e))?;
    }
    wtr.flush()?;
    Ok(bars.len())
}

/// Write a raw bar table to a file.
pub fn write_raw_bars(path: impl AsRef<Path>, bars: &[RangeBar]) -> Result<usize> {
    let path = path.as_ref();
    let n = write_raw_bars_to(File::create(path)?, bars)?;
    info!(path = %path.display(), bars = n, "raw bars written");
    Ok(n)
}

/// Read raw rows.
pub fn read_raw_bars_from<R: Read>(reader: R) -> Result<Vec<RawBarRecord>> {
    let mut rdr = csv::Reader::from_reader(reader);
    rdr.deserialize()
        .enumerate()
        .map(|(i, row)| row.map_err(|e| csv_error(&format!("raw bar row {}", i + 1), e)))
        .collect()
}

/// Read a raw bar table from a file.
pub fn read_raw_bars(path: impl AsRef<Path>) -> Result<Vec<RawBarRecord>> {
    read_raw_bars_from(open_input(path.as_ref())?)
}

// ============================================================================
// Cleaned tables
// ============================================================================

/// Write cleaned rows for the given bars.
pub fn write_clean_bars_to<W: Write>(writer: W, bars: &[RangeBar]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for bar in bars {
        wtr.serialize(CleanBarRecord::from_bar(bar)?)
            .map_err(|e| csv_error("writing clean bar", e))?;
    }
    wtr.flush()?;
    Ok(bars.len())
}

/// Write a cleaned bar table to a file.
pub fn write_clean_bars(path: impl AsRef<Path>, bars: &[RangeBar]) -> Result<usize> {
    let path = path.as_ref();
    let n = write_clean_bars_to(File::create(path)?, bars)?;
    info!(path = %path.display(), bars = n, "clean bars written");
    Ok(n)
}

/// Read cleaned rows. Raw tables are accepted too; their extra columns are
/// ignored and the bar delta is recomputed.
pub fn read_clean_bars_from<R: Read>(reader: R) -> Result<Vec<RangeBar>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut bars = Vec::new();
    for (i, row) in rdr.deserialize::<CleanBarRecord>().enumerate() {
        let record = row.map_err(|e| csv_error(&format!("bar row {}", i + 1), e))?;
        let has_levels = !record.price_stats.trim().is_empty();
        let bar = record.into_bar();
        if has_levels && bar.levels.is_empty() && bar.volume > 0.0 {
            warn!(row = i + 1, "bar has volume but no readable levels");
        }
        bars.push(bar);
    }
    Ok(bars)
}

/// Read a cleaned bar table from a file.
pub fn read_clean_bars(path: impl AsRef<Path>) -> Result<Vec<RangeBar>> {
    let path = path.as_ref();
    let bars = read_clean_bars_from(open_input(path)?)?;
    info!(path = %path.display(), bars = bars.len(), "bars loaded");
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ordered_float::OrderedFloat;
    use trapped_core::LevelMap;

    fn make_bar(open: f64, close: f64) -> RangeBar {
        let t = NaiveDate::from_ymd_opt(2025, 3, 12)
            .unwrap()
            .and_hms_milli_opt(9, 30, 1, 250)
            .unwrap();
        let mut levels = LevelMap::new();
        levels.insert(OrderedFloat(open), PriceLevelStats::new(3.0, 1.0, 2.0));
        levels.insert(OrderedFloat(close), PriceLevelStats::new(4.0, 0.0, 4.0));
        RangeBar {
            open_time: t,
            close_time: t,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 7.0,
            delta: 5.0,
            direction: Direction::from_prices(open, close),
            delta_marks: DeltaMarks {
                open: 10.0,
                high: 15.0,
                low: 9.0,
                close: 15.0,
            },
            levels,
        }
    }

    #[test]
    fn test_raw_table_round_trip() {
        let bars = vec![make_bar(5000.0, 5002.0), make_bar(5002.0, 5000.0)];
        let mut buf = Vec::new();
        assert_eq!(write_raw_bars_to(&mut buf, &bars).unwrap(), 2);

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("open_time,close_time,open,high,low,close,volume,delta_open"));
        assert!(text.contains("2025-03-12 09:30:01.250"));

        let rows = read_raw_bars_from(buf.as_slice()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].direction, Direction::Down);
        assert_eq!(rows[0].delta_marks().high, 15.0);
        assert_eq!(rows[0].level_entries().unwrap().len(), 2);
        assert_eq!(rows[0].open_time, bars[0].open_time);
    }

    #[test]
    fn test_clean_table_round_trip() {
        let bars = vec![make_bar(5000.0, 5002.0)];
        let mut buf = Vec::new();
        write_clean_bars_to(&mut buf, &bars).unwrap();

        let back = read_clean_bars_from(buf.as_slice()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].levels, bars[0].levels);
        assert_eq!(back[0].delta, 5.0);
        assert_eq!(back[0].direction, Direction::Up);
    }

    #[test]
    fn test_clean_reader_accepts_raw_table() {
        let bars = vec![make_bar(5000.0, 5002.0)];
        let mut buf = Vec::new();
        write_raw_bars_to(&mut buf, &bars).unwrap();

        let back = read_clean_bars_from(buf.as_slice()).unwrap();
        // Recomputed from levels: (2 - 1) + (4 - 0)
        assert_eq!(back[0].delta, 5.0);
        assert_eq!(back[0].levels.len(), 2);
    }

    #[test]
    fn test_bad_level_map_reads_as_empty() {
        let csv = "open_time,close_time,open,high,low,close,volume,delta,direction,price_stats\n\
                   2025-03-12 09:30:00,2025-03-12 09:31:00,10,12,10,12,5,1,1,\"{broken\"\n";
        let bars = read_clean_bars_from(csv.as_bytes()).unwrap();
        assert_eq!(bars.len(), 1);
        assert!(bars[0].levels.is_empty());
        assert_eq!(bars[0].delta, 1.0);
    }

    #[test]
    fn test_missing_file() {
        let err = read_clean_bars("/nonexistent/bars.csv").unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }
}
