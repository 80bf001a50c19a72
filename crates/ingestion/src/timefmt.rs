//! Timestamp text formats used by tick and bar files.

use chrono::{NaiveDate, NaiveTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use trapped_core::Timestamp;

/// Format written to bar files.
pub const BAR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const ALT_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y/%m/%d %H:%M:%S%.f"];

/// Parse the tick export format `YYYYMMDD HHMMSS FFFFFFF`.
///
/// The last group is a decimal fraction of a second of any length
/// (`1230000` is 0.123 s).
pub fn parse_tick_time(text: &str) -> Option<Timestamp> {
    let mut parts = text.split_whitespace();
    let date = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
    let hms = parts.next()?;
    let frac = parts.next().unwrap_or("0");
    if parts.next().is_some()
        || hms.len() != 6
        || !hms.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let h: u32 = hms[0..2].parse().ok()?;
    let m: u32 = hms[2..4].parse().ok()?;
    let s: u32 = hms[4..6].parse().ok()?;

    // Left-align the fraction to nanoseconds
    let mut digits: String = frac.chars().take(9).collect();
    while digits.len() < 9 {
        digits.push('0');
    }
    let nanos: u32 = digits.parse().ok()?;

    let time = NaiveTime::from_hms_nano_opt(h, m, s, nanos)?;
    Some(date.and_time(time))
}

/// Parse any supported timestamp form.
pub fn parse_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    std::iter::once(BAR_TIME_FORMAT)
        .chain(ALT_FORMATS)
        .find_map(|fmt| Timestamp::parse_from_str(text, fmt).ok())
        .or_else(|| parse_tick_time(text))
}

/// Serde adapter for bar timestamps.
pub mod serde_bar_time {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(BAR_TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_timestamp(&text)
            .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_tick_time() {
        let ts = parse_tick_time("20250312 093001 1230000").unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-03-12 09:30:01");
        assert_eq!(ts.nanosecond(), 123_000_000);

        assert!(parse_tick_time("20250312 0930").is_none());
        assert!(parse_tick_time("20250312 093001 12a").is_none());
        assert!(parse_tick_time("2025-03-12").is_none());
    }

    #[test]
    fn test_bar_time_forms() {
        let a = parse_timestamp("2025-03-12 09:30:01.123").unwrap();
        let b = parse_timestamp("2025-03-12T09:30:01.123").unwrap();
        let c = parse_timestamp("20250312 093001 1230000").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(
            parse_timestamp("2025-03-12 09:30:00").unwrap().second(),
            0
        );
        assert!(parse_timestamp("yesterday").is_none());
    }
}
