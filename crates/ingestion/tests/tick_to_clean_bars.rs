//! Ticks through aggregation, the raw table, and the cleaner.

use approx::assert_abs_diff_eq;
use trapped_core::config::CleanerConfig;
use trapped_core::Direction;
use trapped_ingestion::bar_io::{read_raw_bars_from, write_raw_bars_to};
use trapped_ingestion::tick_reader::parse_ticks;
use trapped_ingestion::{build_range_bars, BarCleaner};

const TICKS: &str = "\
20250312 093000 0000000;10;9.5;10;1
20250312 093001 0000000;12;11.5;12;1
20250312 093002 0000000;14;13.5;14;1
";

#[test]
fn three_tick_stream_yields_two_up_bars() {
    let (ticks, stats) = parse_ticks(TICKS.as_bytes()).unwrap();
    assert_eq!(stats.dropped, 0);

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
fn bar_invariants_hold_on_choppy_stream() {
    // Oscillating prices with a gap at the end
    let mut rows = String::new();
    let prices = [
        100.0, 100.5, 99.75, 101.0, 101.75, 102.0, 101.5, 100.25, 100.0, 99.5, 98.0, 98.25,
        97.0, 104.5,
    ];
    for (i, p) in prices.iter().enumerate() {
        let (bid, ask) = if i % 2 == 0 { (p - 0.25, *p) } else { (*p, p + 0.25) };
        rows.push_str(&format!("20250312 0930{:02} 0;{p};{bid};{ask};{}\n", i, i + 1));
    }
    let (ticks, _) = parse_ticks(rows.as_bytes()).unwrap();
    let bars = build_range_bars(&ticks, 2.0).unwrap();
    let last = bars.len() - 1;

    for (i, bar) in bars.iter().enumerate() {
        assert!(bar.high >= bar.open.max(bar.close));
        assert!(bar.low <= bar.open.min(bar.close));
        if i < last {
            assert_abs_diff_eq!((bar.close - bar.open).abs(), 2.0, epsilon = 1e-12);
            assert_eq!(bar.direction.sign() as f64, (bar.close - bar.open).signum());
        }
        if bar.is_phantom() {
            assert_eq!(bar.volume, 0.0);
            assert_eq!(bar.open_time, bar.close_time);
        }
    }
    assert!(bars.iter().any(|b| b.is_phantom()));

    // Consecutive bars are contiguous
    for pair in bars.windows(2) {
        assert_eq!(pair[1].open, pair[0].close);
    }

    let total: f64 = bars.iter().map(|b| b.volume).sum();
    let expected: f64 = ticks.iter().map(|t| t.volume).sum();
    assert_abs_diff_eq!(total, expected, epsilon = 1e-9);
}

#[test]
fn raw_table_cleans_to_canonical_bars() {
    let (ticks, _) = parse_ticks(TICKS.as_bytes()).unwrap();
    let bars = build_range_bars(&ticks, 2.0).unwrap();

    let mut buf = Vec::new();
    write_raw_bars_to(&mut buf, &bars).unwrap();
    let records = read_raw_bars_from(buf.as_slice()).unwrap();

    let mut cleaner = BarCleaner::new(&CleanerConfig::default(), 0.25);
    let cleaned = cleaner.clean_records(&records);
    assert_eq!(cleaned.len(), bars.len());
    for (clean, raw) in cleaned.iter().zip(&bars) {
        assert_eq!(clean.levels, raw.levels);
        assert_abs_diff_eq!(clean.delta, clean.level_delta());
        assert_abs_diff_eq!(clean.volume, clean.level_volume());
    }

    let again = cleaner.clean_bars(&cleaned);
    assert_eq!(again, cleaned);
}
