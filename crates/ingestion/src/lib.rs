//! Data ingestion and normalization for the trapped-orders pipeline.
//!
//! This crate handles:
//! - Tick file reading
//! - Trade side inference (bid/ask classification)
//! - Range bar building with per-price order flow
//! - Level map encoding/decoding and bar cleaning
//! - Bar table reading and writing

pub mod bar_builder;
pub mod bar_io;
pub mod classifier;
pub mod cleaner;
pub mod price_stats;
pub mod tick_reader;
pub mod timefmt;

pub use bar_builder::{build_range_bars, DeltaAccumulator, RangeBarBuilder};
pub use bar_io::{
    read_clean_bars, read_raw_bars, write_clean_bars, write_raw_bars, CleanBarRecord,
    RawBarRecord,
};
pub use classifier::{ClassificationStats, TickClassifier};
pub use cleaner::{clean_bars, BarCleaner, CleanStats};
pub use price_stats::{decode_levels, decode_levels_lossy, encode_levels};
pub use tick_reader::{read_ticks, TickReadStats};
