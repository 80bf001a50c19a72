//! Backtesting and statistics for the trapped-orders pipeline.
//!
//! This crate provides:
//! - Directional reversal backtest of a triggered bar
//! - Per-parameter scanning of a cleaned bar table
//! - Scan summary metrics and scoring
//! - Parameter grid search
//! - Validation-window statistics

pub mod grid;
pub mod metrics;
pub mod reversal;
pub mod scanner;
pub mod window_stats;

pub use grid::{GridCsvRow, GridParams, GridReport, GridRow, GridSearch, Identikit};
pub use metrics::{OutcomeProfile, ScanSummary};
pub use reversal::{BacktestState, Rejection, ReversalEngine};
pub use scanner::{PatternScanner, TriggerRecord};
pub use window_stats::{WindowAnalysis, WindowAnalyzer, WindowRecommendations, WindowReport};
