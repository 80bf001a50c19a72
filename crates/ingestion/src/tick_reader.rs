//! Reader for headerless `;`-delimited tick exports.
//!
//! Each row is `datetime;last;bid;ask;volume`. Rows with any unreadable
//! field are dropped and counted.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use trapped_core::{Error, Result, Tick};
use tracing::{debug, info, warn};

use crate::timefmt::parse_timestamp;

/// Counters from one tick read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReadStats {
    /// Rows seen.
    pub rows: usize,
    /// Rows dropped as malformed.
    pub dropped: usize,
}

impl TickReadStats {
    /// Rows kept.
    pub fn kept(&self) -> usize {
        self.rows - self.dropped
    }
}

fn parse_row(record: &csv::StringRecord) -> Option<Tick> {
    if record.len() < 5 {
        return None;
    }
    let num = |i: usize| -> Option<f64> {
        let v: f64 = record.get(i)?.trim().replace(',', ".").parse().ok()?;
        v.is_finite().then_some(v)
    };

    let tick = Tick {
        time: parse_timestamp(record.get(0)?)?,
        price: num(1)?,
        bid: num(2)?,
        ask: num(3)?,
        volume: num(4)?,
    };
    tick.is_valid().then_some(tick)
}

/// Parse ticks from any reader.
pub fn parse_ticks<R: Read>(reader: R) -> Result<(Vec<Tick>, TickReadStats)> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut ticks = Vec::new();
    let mut stats = TickReadStats::default();
    let mut record = csv::StringRecord::new();

    loop {
        match rdr.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                stats.rows += 1;
                match parse_row(&record) {
                    Some(tick) => ticks.push(tick),
                    None => {
                        stats.dropped += 1;
                        debug!(row = stats.rows, ?record, "dropping malformed tick row");
                    }
                }
            }
            Err(e) if e.is_io_error() => {
                return Err(Error::data(format!("reading ticks: {e}")));
            }
            Err(e) => {
                // Undecodable bytes: count the row and keep going
                stats.rows += 1;
                stats.dropped += 1;
                debug!(error = %e, "dropping unreadable tick row");
            }
        }
    }

    if stats.dropped > 0 {
        warn!(dropped = stats.dropped, rows = stats.rows, "malformed tick rows dropped");
    }
    Ok((ticks, stats))
}

/// Read a tick file.
pub fn read_ticks(path: impl AsRef<Path>) -> Result<(Vec<Tick>, TickReadStats)> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::missing_input(path.display().to_string()));
    }
    let (ticks, stats) = parse_ticks(File::open(path)?)?;
    info!(path = %path.display(), ticks = ticks.len(), dropped = stats.dropped, "ticks loaded");
    Ok((ticks, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticks() {
        let data = "20250312 093001 1230000;5000.25;5000;5000.25;3\n\
                    20250312 093002 0000000;5000;5000;5000.25;1\n";
        let (ticks, stats) = parse_ticks(data.as_bytes()).unwrap();

        assert_eq!(ticks.len(), 2);
        assert_eq!(stats, TickReadStats { rows: 2, dropped: 0 });
        assert_eq!(ticks[0].price, 5000.25);
        assert_eq!(ticks[0].volume, 3.0);
        assert!(ticks[1].time > ticks[0].time);
    }

    #[test]
    fn test_malformed_rows_dropped() {
        let data = "20250312 093001 0;5000.25;5000;5000.25;3\n\
                    20250312 093001 0;abc;5000;5000.25;3\n\
                    garbage;5000;5000;5000.25;1\n\
                    20250312 093003 0;5000;5000\n\
                    20250312 093004 0;5000;5000;5000.25;-2\n\
                    20250312 093005 0;5000,5;5000;5000.25;1\n";
        let (ticks, stats) = parse_ticks(data.as_bytes()).unwrap();

        assert_eq!(stats.rows, 6);
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.kept(), 2);
        assert_eq!(ticks[1].price, 5000.5);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_ticks("/nonexistent/ticks.txt"),
            Err(Error::MissingInput(_))
        ));
    }
}
