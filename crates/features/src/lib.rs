//! Feature computation for the trapped-orders pipeline.
//!
//! This crate handles:
//! - Per-bar price level profiles (extremes, concentration, aggression)
//! - Diagonal imbalances between adjacent levels
//! - Exhaustion detection
//! - Trigger detection
//! - Pattern classification of triggered bars
//!
//! Everything here is a pure function of one bar's levels.

pub mod exhaustion;
pub mod imbalance;
pub mod levels;
pub mod pattern;
pub mod trigger;

pub use levels::LevelProfile;
pub use pattern::{BarPattern, PatternClassifier};
pub use trigger::{has_volume_aggression_trigger, is_triggered, SideConditions};
