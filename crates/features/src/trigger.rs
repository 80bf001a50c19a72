//! Volume-concentration and aggression trigger.

use trapped_core::config::TriggerConfig;
use trapped_core::LevelMap;

use crate::levels::LevelProfile;

/// Which sides of the bar meet the trigger conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideConditions {
    /// Concentration in the top levels and ask aggression.
    pub high: bool,
    /// Concentration in the bottom levels and bid aggression.
    pub low: bool,
}

/// Evaluate each side's conditions independently.
pub fn side_conditions(profile: &LevelProfile, config: &TriggerConfig) -> SideConditions {
    let n = config.n_extremes;
    SideConditions {
        high: profile.has_concentration(profile.high_extremes(n), config.vol_threshold)
            && profile.high_ask_aggression(n) >= config.aggression_threshold,
        low: profile.has_concentration(profile.low_extremes(n), config.vol_threshold)
            && profile.low_bid_aggression(n) >= config.aggression_threshold,
    }
}

/// Whether the bar triggers.
///
/// Concentration may sit at either end while the aggression comes from the
/// other; the two conditions are checked over the combined extremes.
pub fn is_triggered(profile: &LevelProfile, config: &TriggerConfig) -> bool {
    if profile.is_empty() || profile.total_volume() <= 0.0 {
        return false;
    }
    let n = config.n_extremes;
    let concentrated = profile.has_concentration(profile.high_extremes(n), config.vol_threshold)
        || profile.has_concentration(profile.low_extremes(n), config.vol_threshold);
    let aggressive = profile.high_ask_aggression(n) >= config.aggression_threshold
        || profile.low_bid_aggression(n) >= config.aggression_threshold;
    concentrated && aggressive
}

/// Trigger check straight from a level map.
pub fn has_volume_aggression_trigger(levels: &LevelMap, config: &TriggerConfig) -> bool {
    is_triggered(&LevelProfile::new(levels), config)
}
