//! Core types and configuration for the trapped-orders research pipeline.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (ticks, price levels, range bars)
//! - Classification and backtest result types
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
